//! Time sources.
//!
//! Elapsed time is always derived from the monotonic reading, never from
//! counting ticks, so a suspended process catches up on its next tick.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    /// Time since an arbitrary fixed origin. Never goes backwards.
    fn monotonic(&self) -> Duration;
    fn wall(&self) -> DateTime<Utc>;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used by tests and track replay.
pub struct ManualClock {
    state: Mutex<(Duration, DateTime<Utc>)>,
}

impl ManualClock {
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new((Duration::ZERO, wall)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.0 += by;
            state.1 += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        }
    }

    /// Moves wall time to `wall`, advancing monotonic time by the same
    /// amount. Earlier instants are ignored.
    pub fn advance_to(&self, wall: DateTime<Utc>) {
        let current = self.wall();
        if let Ok(delta) = (wall - current).to_std() {
            self.advance(delta);
        }
    }
}

impl Clock for ManualClock {
    fn monotonic(&self) -> Duration {
        self.state
            .lock()
            .map(|state| state.0)
            .unwrap_or_default()
    }

    fn wall(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .map(|state| state.1)
            .unwrap_or_else(|_| Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_moves_both_readings() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.monotonic(), Duration::from_secs(90));
        assert_eq!(clock.wall(), start + chrono::Duration::seconds(90));
    }

    #[test]
    fn advance_to_never_goes_backwards() {
        let start = Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance_to(start + chrono::Duration::seconds(30));
        clock.advance_to(start);
        assert_eq!(clock.monotonic(), Duration::from_secs(30));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.monotonic();
        let b = clock.monotonic();
        assert!(b >= a);
    }
}
