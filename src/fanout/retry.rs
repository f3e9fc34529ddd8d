//! Retry/backoff policy
//!
//! Decides after each completed attempt whether a job gets another one, and
//! how long it waits first.

use super::classify::Classification;
use rand::Rng;
use std::time::Duration;

/// Retry limits plus the exponential backoff window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_init: Duration,
    backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// `backoff_max` below `backoff_init` is raised to `backoff_init`.
    pub fn new(max_retries: u32, backoff_init: Duration, backoff_max: Duration) -> Self {
        Self {
            max_retries,
            backoff_init,
            backoff_max: backoff_max.max(backoff_init),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_init(&self) -> Duration {
        self.backoff_init
    }

    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }

    /// Retry iff the outcome is transient and the job has retries left.
    pub fn should_retry(&self, classification: Classification, retries_so_far: u32) -> bool {
        classification.is_retryable() && retries_so_far < self.max_retries
    }

    /// Backoff before the next attempt, given the one before it.
    ///
    /// The first wait is the initial backoff plus up to 50% jitter; later
    /// waits double the previous one. Every wait is capped at the maximum, so
    /// the sequence for one job never decreases.
    pub fn next_backoff<R: Rng>(&self, previous: Duration, rng: &mut R) -> Duration {
        let next = if previous.is_zero() {
            let init_ms = self.backoff_init.as_millis() as u64;
            let jitter_ms = rng.random_range(0..=init_ms / 2);
            self.backoff_init + Duration::from_millis(jitter_ms)
        } else {
            previous.saturating_mul(2)
        };
        next.min(self.backoff_max)
    }
}
