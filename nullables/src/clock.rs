//! Nullable clock: deterministic time for testing.

use lcap_types::Timestamp;
use std::cell::Cell;

/// A deterministic millisecond clock.
///
/// Time only advances when you tell it to.
pub struct NullClock {
    current: Cell<u64>,
}

impl NullClock {
    pub fn new(initial_millis: u64) -> Self {
        Self {
            current: Cell::new(initial_millis),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::new(self.current.get())
    }

    /// Advance time by `millis`.
    pub fn advance(&self, millis: u64) {
        self.current.set(self.current.get() + millis);
    }

    /// Jump to `at`. Never moves backwards.
    pub fn advance_to(&self, at: Timestamp) {
        self.current.set(self.current.get().max(at.as_millis()));
    }

    pub fn set(&self, millis: u64) {
        self.current.set(millis);
    }
}
