//! Reconnect backoff schedule.

use std::time::Duration;

/// Delay schedule between reconnect attempts: doubling from an initial
/// value up to a cap, reset to the start after a successful reopen.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Option<Duration>,
    attempts: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: None,
            attempts: 0,
        }
    }

    /// Delay to wait before the next attempt. Non-decreasing until capped.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.initial,
            Some(prev) => self.max.min(prev * 2),
        };
        self.current = Some(delay);
        self.attempts += 1;
        delay
    }

    /// Successful reopen: the next failure starts from the initial delay.
    pub fn reset(&mut self) {
        self.current = None;
        self.attempts = 0;
    }

    /// Attempts since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(30))
    }
}
