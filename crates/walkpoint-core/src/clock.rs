//! Injectable clock.
//!
//! Every timestamp and every day key in the ledger comes from a single
//! [`Clock`] instance, so counter lookup and transaction timestamping can
//! never disagree about which day an event lands in.
//!
//! The day boundary is **UTC midnight**: day keys are the [`NaiveDate`] of
//! the clock's UTC instant. Daily caps reset at 00:00 UTC for every user.

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// Returns the current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Returns the current day key (UTC calendar date).
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock pinned to an explicit instant, settable at runtime.
///
/// Used by tests to exercise day-boundary behavior deterministically.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock pinned to `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Moves the clock to a new instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    /// Advances the clock by a duration.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 23, 30, 0).unwrap());
        assert_eq!(
            clock.today(),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
        );

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(
            clock.today(),
            NaiveDate::from_ymd_opt(2025, 3, 2).unwrap()
        );
    }
}
