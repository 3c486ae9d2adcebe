//! # Fibonacci Backoff
//!
//! Delay sequence for retrying the listening socket bind. A port held by a
//! previous instance is usually released within seconds, so the sequence
//! is computed in seconds: 1s, 1s, 2s, 3s, 5s, 8s, ... up to the cap.

use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each delay is the sum of the previous two, capped at `max_secs`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous delay in seconds
    prev_secs: u64,
    /// Delay returned by the next call, in seconds
    current_secs: u64,
    /// Upper bound in seconds
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a backoff starting at `min_secs` and capped at `max_secs`
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            prev_secs: 0,
            current_secs: min_secs.min(max_secs),
            max_secs,
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        Duration::from_secs(result)
    }
}
