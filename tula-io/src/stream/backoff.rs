//! Bounded exponential backoff for reconnect loops

use std::time::Duration;

/// Delay doubles from `initial` on each attempt and saturates at `max`
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let max = max.max(initial);
        Self {
            initial,
            max,
            next: initial,
            attempt: 0,
        }
    }

    /// Count one more attempt and return how long to wait before it
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.attempt = self.attempt.saturating_add(1);
        self.next = (self.next * 2).min(self.max);
        delay
    }

    /// Attempts since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Back to the initial delay after a successful connect
    pub fn reset(&mut self) {
        self.next = self.initial;
        self.attempt = 0;
    }
}
