//! Observable warnings raised while recording.
//!
//! None of these change distance or time accounting; they only surface
//! conditions the host may want to show.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFlags {
    /// No accepted fix within the signal timeout.
    pub signal_lost: bool,
    /// No accepted fix within the inactivity timeout.
    pub inactive: bool,
    /// Rolling average speed above the watch threshold.
    pub speed_too_high: bool,
}

/// Rolling mean over the last N reported speeds.
#[derive(Debug, Clone)]
pub struct SpeedWatch {
    window: usize,
    threshold_mps: f64,
    samples: VecDeque<f64>,
}

impl SpeedWatch {
    pub fn new(window: usize, threshold_kmh: f64) -> Self {
        let window = window.max(1);
        Self {
            window,
            threshold_mps: threshold_kmh / 3.6,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Records a speed and returns whether the rolling mean is over the line.
    pub fn push(&mut self, speed_mps: f64) -> bool {
        self.samples.push_back(speed_mps);
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
        self.is_over()
    }

    pub fn is_over(&self) -> bool {
        if self.samples.is_empty() {
            return false;
        }
        let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        mean > self.threshold_mps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_spike_is_averaged_out() {
        let mut watch = SpeedWatch::new(5, 15.0);
        for _ in 0..4 {
            assert!(!watch.push(1.5));
        }
        assert!(!watch.push(10.0));
    }

    #[test]
    fn sustained_speed_trips_and_recovers() {
        let mut watch = SpeedWatch::new(5, 15.0);
        for _ in 0..5 {
            watch.push(5.0);
        }
        assert!(watch.is_over());
        for _ in 0..5 {
            watch.push(1.0);
        }
        assert!(!watch.is_over());
    }

    #[test]
    fn empty_window_is_not_over() {
        assert!(!SpeedWatch::new(5, 15.0).is_over());
    }
}
