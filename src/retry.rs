//! Exponential backoff for transient failures.
//!
//! Each consumer owns its own [`Backoff`] instance; the sync scheduler and
//! any other retrying component never share delay state.

use std::time::Duration;

/// Capped exponential backoff: `base, 2*base, 4*base, ... , cap`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `base` and never exceeding `cap`.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            next: base,
        }
    }

    /// Returns the delay to sleep before the next attempt, then doubles it.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next.saturating_mul(2)).min(self.cap);
        delay
    }

    /// Resets the delay sequence back to `base`.
    pub fn reset(&mut self) {
        self.next = self.base;
    }
}
