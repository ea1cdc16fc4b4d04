//! # Fibonacci Backoff
//!
//! Requeue delays for Hibernators whose reconcile failed outright (schedule
//! could not be evaluated, status could not be written). Delays grow along
//! the Fibonacci sequence in minutes: 1m, 1m, 2m, 3m, 5m, 8m, 10m (max).
//!
//! Each Hibernator (`namespace/name`) has its own sequence, reset as soon as
//! a reconcile succeeds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Calculations are performed in minutes, then converted to seconds.
/// Each backoff is the sum of the previous two backoffs.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Minimum backoff value in minutes (for reset)
    min_minutes: u64,
    /// Previous backoff value in minutes
    prev_minutes: u64,
    /// Current backoff value in minutes
    current_minutes: u64,
    /// Maximum backoff value in minutes
    max_minutes: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with specified minimum and maximum values in minutes
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            prev_minutes: 0,
            current_minutes: min_minutes,
            max_minutes: max_minutes.max(min_minutes),
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result_seconds = self.current_minutes * 60;

        let next_minutes = self.prev_minutes + self.current_minutes;
        self.prev_minutes = self.current_minutes;
        self.current_minutes = std::cmp::min(next_minutes, self.max_minutes);

        result_seconds
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_minutes = 0;
        self.current_minutes = self.min_minutes;
    }
}

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

/// Per-resource backoff sequences, shared between reconcile and error policy
#[derive(Debug, Clone)]
pub struct BackoffTracker {
    min_minutes: u64,
    max_minutes: u64,
    states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl BackoffTracker {
    #[must_use]
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            min_minutes,
            max_minutes,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record a failure for `resource_key` and return (delay, consecutive errors)
    pub fn record_error(&self, resource_key: &str) -> (Duration, u32) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let state = states
            .entry(resource_key.to_string())
            .or_insert_with(|| BackoffState {
                backoff: FibonacciBackoff::new(self.min_minutes, self.max_minutes),
                error_count: 0,
            });
        state.error_count += 1;
        (state.backoff.next_backoff(), state.error_count)
    }

    /// Forget the failures of `resource_key` (on successful reconciliation)
    pub fn reset(&self, resource_key: &str) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = states.get_mut(resource_key) {
            state.error_count = 0;
            state.backoff.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 10);

        // 1m, 1m, 2m, 3m, 5m, 8m, 10m (max)
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 120);
        assert_eq!(backoff.next_backoff_seconds(), 180);
        assert_eq!(backoff.next_backoff_seconds(), 300);
        assert_eq!(backoff.next_backoff_seconds(), 480);
        assert_eq!(backoff.next_backoff_seconds(), 600);
        // 13m would exceed the cap
        assert_eq!(backoff.next_backoff_seconds(), 600);
        assert_eq!(backoff.next_backoff_seconds(), 600);
    }

    #[test]
    fn test_fibonacci_backoff_reset() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 60);
        assert_eq!(backoff.next_backoff_seconds(), 120);

        backoff.reset();

        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(60));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(120));
    }

    #[test]
    fn test_max_below_min_is_raised() {
        let mut backoff = FibonacciBackoff::new(5, 2);
        assert_eq!(backoff.next_backoff_seconds(), 300);
        assert_eq!(backoff.next_backoff_seconds(), 300);
        assert_eq!(backoff.next_backoff_seconds(), 300);
    }

    #[test]
    fn test_tracker_is_per_resource() {
        let tracker = BackoffTracker::new(1, 10);
        assert_eq!(tracker.record_error("prod/nightly"), (Duration::from_secs(60), 1));
        assert_eq!(tracker.record_error("prod/nightly"), (Duration::from_secs(60), 2));
        assert_eq!(tracker.record_error("prod/nightly"), (Duration::from_secs(120), 3));
        assert_eq!(tracker.record_error("dev/weekend"), (Duration::from_secs(60), 1));

        tracker.reset("prod/nightly");
        assert_eq!(tracker.record_error("prod/nightly"), (Duration::from_secs(60), 1));
        // Resetting an unknown resource is a no-op
        tracker.reset("staging/unknown");
    }
}
