//! Timestamp type and duration constants used throughout the protocol.
//!
//! All times are Unix epoch milliseconds (UTC); all durations are plain `u64`
//! millisecond counts. Poll deadlines, vote windows and hash estimates are all
//! expressed on this scale.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const SECOND: u64 = 1_000;
pub const MINUTE: u64 = 60 * SECOND;
pub const HOUR: u64 = 60 * MINUTE;
pub const DAY: u64 = 24 * HOUR;
pub const WEEK: u64 = 7 * DAY;

/// A Unix timestamp in milliseconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get the current system time as a `Timestamp`.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self(millis)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// This timestamp moved forward by `millis`.
    pub fn plus(&self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    /// This timestamp moved backward by `millis`, clamped at the epoch.
    pub fn minus(&self, millis: u64) -> Self {
        Self(self.0.saturating_sub(millis))
    }

    /// Milliseconds from `now` until this timestamp (zero once passed).
    pub fn remaining_from(&self, now: Timestamp) -> u64 {
        self.0.saturating_sub(now.0)
    }

    /// Milliseconds elapsed since this timestamp (relative to `now`).
    pub fn elapsed_since(&self, now: Timestamp) -> u64 {
        now.0.saturating_sub(self.0)
    }

    /// Whether this timestamp has been reached relative to `now`.
    pub fn has_passed(&self, now: Timestamp) -> bool {
        now.0 >= self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_saturates() {
        let deadline = Timestamp::new(1_000);
        assert_eq!(deadline.remaining_from(Timestamp::new(400)), 600);
        assert_eq!(deadline.remaining_from(Timestamp::new(2_000)), 0);
        assert!(deadline.has_passed(Timestamp::new(1_000)));
        assert!(!deadline.has_passed(Timestamp::new(999)));
    }

    #[test]
    fn arithmetic_clamps() {
        assert_eq!(Timestamp::new(5).minus(10), Timestamp::EPOCH);
        assert_eq!(Timestamp::new(u64::MAX).plus(1), Timestamp::new(u64::MAX));
    }
}
