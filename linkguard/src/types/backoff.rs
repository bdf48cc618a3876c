//! Reconnect backoff for the point-to-point link.

use std::time::Duration;

/// Doubling backoff with a ceiling.
///
/// `current()` is the delay to wait before the next reconnect attempt. Each
/// consecutive failure doubles it up to `max`; a success resets it to `min`.
/// With `min == max` this degenerates to a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// # Panics
    /// Panics if `min` is zero or greater than `max`.
    pub fn new(min: Duration, max: Duration) -> Self {
        assert!(!min.is_zero(), "backoff minimum must be non-zero");
        assert!(min <= max, "backoff minimum must not exceed maximum");
        Self { min, max, current: min }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failure. Returns the delay to wait before reconnecting and
    /// advances the delay used for the following failure.
    pub fn on_failure(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Record a success, resetting the delay to the minimum.
    pub fn on_success(&mut self) {
        self.current = self.min;
    }
}
