//! Time sources for bucket refill.

use chrono::Utc;
use parking_lot::Mutex;

/// Supplies wall-clock time as fractional epoch seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        Utc::now().timestamp_micros() as f64 / 1_000_000.0
    }
}

/// A clock that only moves when told to.
///
/// Useful for exercising refill behavior without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward (or backward, for a negative value).
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}
