//! Time sources.
//!
//! Every time-dependent decision (not-before eligibility, breaker windows,
//! lock staleness, scheduler cooldown) reads the injected [`Clock`] instead of
//! calling `Utc::now()` directly, so tests can drive time deterministically.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Abstraction over wall-clock time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// Production clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.now.write() += by;
    }

    /// Move the clock forward by a std duration
    pub fn advance_std(&self, by: std::time::Duration) {
        self.advance(to_chrono(by));
    }

    /// Jump to an absolute instant
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.write() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

/// Default shared clock
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Convert a std duration, saturating at the chrono maximum
pub(crate) fn to_chrono(duration: std::time::Duration) -> Duration {
    Duration::from_std(duration).unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_all_clones() {
        let clock = ManualClock::default();
        let shared = clock.clone();
        let start = clock.now();

        clock.advance(Duration::minutes(5));

        assert_eq!(shared.now() - start, Duration::minutes(5));
    }

    #[test]
    fn test_to_chrono_saturates() {
        assert_eq!(to_chrono(std::time::Duration::from_millis(1500)), Duration::milliseconds(1500));
        assert_eq!(to_chrono(std::time::Duration::MAX), Duration::MAX);
    }
}
