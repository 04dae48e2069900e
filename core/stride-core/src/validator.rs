//! Post-hoc classification of a finished session.
//!
//! Speed is checked before duration: a short, fast session is attributed to
//! a vehicle rather than to being too short.

use stride_protocol::{ActivityStatus, InvalidReason};

use crate::config::ValidationConfig;
use crate::types::Evaluation;

/// Average speed in km/h, rounded to two decimals. Zero when no time elapsed.
pub fn average_speed_kmh(distance_km: f64, duration_sec: u64) -> f64 {
    if duration_sec == 0 || !distance_km.is_finite() {
        return 0.0;
    }
    let kmh = distance_km / (duration_sec as f64 / 3600.0);
    (kmh * 100.0).round() / 100.0
}

pub fn evaluate(distance_km: f64, duration_sec: u64, config: &ValidationConfig) -> Evaluation {
    let avg_speed_kmh = average_speed_kmh(distance_km, duration_sec);

    let invalid_reason = if avg_speed_kmh > config.vehicle_speed_kmh {
        Some(InvalidReason::Vehicle)
    } else if duration_sec < config.min_duration_secs {
        Some(InvalidReason::TooShort)
    } else {
        None
    };

    Evaluation {
        status: if invalid_reason.is_some() {
            ActivityStatus::Invalida
        } else {
            ActivityStatus::Valida
        },
        invalid_reason,
        avg_speed_kmh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(distance_km: f64, duration_sec: u64) -> Evaluation {
        evaluate(distance_km, duration_sec, &ValidationConfig::default())
    }

    #[test]
    fn long_fast_session_is_vehicle() {
        let result = eval(10.0, 1200);
        assert_eq!(result.avg_speed_kmh, 30.0);
        assert_eq!(result.status, ActivityStatus::Invalida);
        assert_eq!(result.invalid_reason, Some(InvalidReason::Vehicle));
    }

    #[test]
    fn short_fast_session_is_vehicle_not_too_short() {
        let result = eval(1.0, 120);
        assert_eq!(result.avg_speed_kmh, 30.0);
        assert_eq!(result.invalid_reason, Some(InvalidReason::Vehicle));
    }

    #[test]
    fn short_slow_session_is_too_short() {
        let result = eval(0.5, 200);
        assert_eq!(result.avg_speed_kmh, 9.0);
        assert_eq!(result.status, ActivityStatus::Invalida);
        assert_eq!(result.invalid_reason, Some(InvalidReason::TooShort));
    }

    #[test]
    fn walk_is_valid() {
        let result = eval(2.0, 1800);
        assert_eq!(result.avg_speed_kmh, 4.0);
        assert_eq!(result.status, ActivityStatus::Valida);
        assert_eq!(result.invalid_reason, None);
    }

    #[test]
    fn zero_duration_has_zero_speed() {
        let result = eval(3.0, 0);
        assert_eq!(result.avg_speed_kmh, 0.0);
        assert_eq!(result.invalid_reason, Some(InvalidReason::TooShort));
    }

    #[test]
    fn exactly_at_thresholds_is_valid() {
        // 20 km/h over exactly 300 s.
        let result = eval(20.0 * 300.0 / 3600.0, 300);
        assert_eq!(result.avg_speed_kmh, 20.0);
        assert_eq!(result.status, ActivityStatus::Valida);
    }

    #[test]
    fn speed_is_rounded_to_two_decimals() {
        assert_eq!(average_speed_kmh(1.0, 7 * 60), 8.57);
    }
}
