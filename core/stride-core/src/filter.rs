//! Quality gate applied to every fix before it can touch the route.

use crate::config::FilterConfig;
use crate::geo;
use crate::types::{RoutePoint, Sample};

/// Why a fix was discarded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    /// Reported horizontal accuracy is worse than the ceiling (or missing).
    LowAccuracy { accuracy_m: f64 },
    /// Too close to the last accepted fix to be real movement.
    Jitter { displacement_m: f64 },
    /// Latitude/longitude out of range or not a number.
    BadCoordinates,
}

#[derive(Debug, Clone)]
pub struct SampleFilter {
    max_accuracy_m: f64,
    min_displacement_m: f64,
}

impl SampleFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            max_accuracy_m: config.max_accuracy_m,
            min_displacement_m: config.min_displacement_m,
        }
    }

    pub fn accept(&self, sample: &Sample, last_accepted: Option<&RoutePoint>) -> bool {
        self.check(sample, last_accepted).is_ok()
    }

    /// Same decision as [`SampleFilter::accept`], with the reason on rejection.
    pub fn check(&self, sample: &Sample, last_accepted: Option<&RoutePoint>) -> Result<(), Rejection> {
        if !valid_coordinates(sample) {
            return Err(Rejection::BadCoordinates);
        }

        let accuracy_m = sample.accuracy_meters;
        if !accuracy_m.is_finite() || accuracy_m > self.max_accuracy_m {
            return Err(Rejection::LowAccuracy { accuracy_m });
        }

        let Some(last) = last_accepted else {
            return Ok(());
        };

        let displacement_m = geo::distance_km(last, sample) * 1000.0;
        if displacement_m < self.min_displacement_m {
            return Err(Rejection::Jitter { displacement_m });
        }

        Ok(())
    }
}

fn valid_coordinates(sample: &Sample) -> bool {
    sample.latitude.is_finite()
        && sample.longitude.is_finite()
        && (-90.0..=90.0).contains(&sample.latitude)
        && (-180.0..=180.0).contains(&sample.longitude)
}
