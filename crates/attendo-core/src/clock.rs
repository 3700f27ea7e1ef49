//! Time sources for presence tracking.

use crate::types::Timestamp;
use chrono::Utc;
use std::sync::Mutex;
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock origin advanced by a monotonic `Instant`.
///
/// Readings map onto UTC for persistence but never go backwards, even if
/// the system clock is stepped while a session is running.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin_wall: Timestamp,
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin_wall: Utc::now(),
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Timestamp {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed()).unwrap_or(chrono::Duration::zero());
        self.origin_wall + elapsed
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self { now: Mutex::new(start) }
    }

    /// Clock at the Unix epoch, convenient for tests counting whole seconds.
    pub fn at_epoch() -> Self {
        Self::new(Timestamp::default())
    }

    pub fn set(&self, t: Timestamp) {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = t;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *now += by;
    }

    pub fn advance_secs_f64(&self, secs: f64) {
        self.advance(chrono::Duration::milliseconds((secs * 1000.0).round() as i64));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..100 {
            let t = clock.now();
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::at_epoch();
        clock.advance_secs_f64(1.5);
        assert_eq!(clock.now().timestamp_millis(), 1500);
        clock.set(Timestamp::default());
        assert_eq!(clock.now().timestamp_millis(), 0);
    }
}
