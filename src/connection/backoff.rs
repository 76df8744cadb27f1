//! Exponential reconnect delay

use std::time::Duration;

/// Doubling delay, capped at `max`, reset to `base` on success
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let max = max.max(base);
        Self {
            base,
            max,
            current: base,
        }
    }

    /// Delay to wait before the next attempt
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failure: double the delay up to the cap
    pub fn advance(&mut self) {
        self.current = self.current.saturating_mul(2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }

    /// Change the cap (hot reload); never below the base delay
    pub fn set_max(&mut self, max: Duration) {
        self.max = max.max(self.base);
        self.current = self.current.min(self.max);
    }
}
