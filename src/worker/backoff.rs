//! Empty-poll backoff

use std::time::Duration;

/// Sleep multiplier and consecutive-empty-poll counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffState {
    pub multiplier: u32,
    pub consecutive_empty: u32,
    cap: u32,
}

impl BackoffState {
    pub fn new(cap: u32) -> Self {
        Self {
            multiplier: 1,
            consecutive_empty: 0,
            cap: cap.max(1),
        }
    }

    /// Record an empty poll: returns the sleep for this poll and doubles
    /// the multiplier for the next one, up to the cap.
    pub fn next_delay(&mut self, poll_interval: Duration) -> Duration {
        let delay = poll_interval.saturating_mul(self.multiplier);
        self.consecutive_empty = self.consecutive_empty.saturating_add(1);
        self.multiplier = self.multiplier.saturating_mul(2).min(self.cap);
        delay
    }

    /// A claim succeeded
    pub fn reset(&mut self) {
        self.multiplier = 1;
        self.consecutive_empty = 0;
    }
}
