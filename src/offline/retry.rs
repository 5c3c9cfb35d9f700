//! # Retry Policy and Backoff
//!
//! Decides when a transiently failed operation becomes eligible again and
//! when it has run out of retry budget.
//!
//! ## Features
//!
//! - **Exponential Backoff**: `base_delay * 2^(n-1)` after the n-th failure
//! - **Delay Cap**: never waits longer than `max_delay`
//! - **Max Retries**: the failure that reaches the budget is terminal
//!
//! Backoff is a re-eligibility time stored on the queue entry, never a sleep;
//! other entities keep draining while one waits out its window.
//!
//! ## Usage
//!
//! ```rust
//! use fintrack_sync::offline::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.delay_for(1), Duration::from_secs(1));
//! assert_eq!(policy.delay_for(2), Duration::from_secs(2));
//! assert!(policy.is_exhausted(3, 3));
//! ```

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::shared::config::{SyncConfig, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES};

/// Exponential backoff without jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Budget given to newly enqueued operations
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.base_delay, config.max_delay, config.max_retries)
    }

    /// Delay after the `retry_count`-th failure
    ///
    /// `retry_count` is the value after the failure was counted, so the first
    /// failure waits `base_delay`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count.saturating_sub(1))
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Whether each delay within the budget is longer than the one before
    ///
    /// The failure that exhausts the budget schedules nothing, so delays run
    /// up to `max_retries - 1`. That run grows strictly as long as the delay
    /// before its last step stays under `max_delay`.
    pub fn is_strictly_increasing(&self) -> bool {
        if self.base_delay.is_zero() {
            return false;
        }
        let last = self.max_retries.saturating_sub(1);
        last < 2 || self.delay_for(last - 1) < self.max_delay
    }

    /// When an entry that has failed `retry_count` times may run again
    pub fn next_attempt_at(&self, now: DateTime<Utc>, retry_count: u32) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(retry_count))
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Whether `retry_count` failures use up a budget of `max_retries`
    pub fn is_exhausted(&self, retry_count: u32, max_retries: u32) -> bool {
        retry_count >= max_retries
    }
}
