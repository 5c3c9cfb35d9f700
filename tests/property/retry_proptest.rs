//! Property-based tests for the backoff policy and last-write-wins

use chrono::{Duration as TimeDelta, TimeZone, Utc};
use proptest::prelude::*;
use std::time::Duration;

use fintrack_sync::offline::reconciliation::{last_write_wins, Winner};
use fintrack_sync::offline::retry::RetryPolicy;
use fintrack_sync::shared::config::SyncConfig;

proptest! {
    #[test]
    fn test_backoff_never_exceeds_cap(base_ms in 1u64..5_000, max_s in 1u64..900, failures in 1u32..64) {
        let base = Duration::from_millis(base_ms);
        let max = Duration::from_secs(max_s).max(base);
        let policy = RetryPolicy::new(base, max, 3);

        prop_assert_eq!(policy.delay_for(1), base);

        // Past the budget the cap holds delays level
        let mut previous = Duration::ZERO;
        for n in 1..=failures {
            let delay = policy.delay_for(n);
            prop_assert!(delay >= previous, "delay shrank at failure {}", n);
            prop_assert!(delay <= max);
            previous = delay;
        }
    }

    #[test]
    fn test_accepted_budgets_grow_strictly(base_ms in 0u64..2_000, max_s in 1u64..900, max_retries in 1u32..12) {
        let config = SyncConfig {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(max_s),
            max_retries,
            ..SyncConfig::default()
        };
        prop_assume!(config.validate().is_ok());

        let policy = RetryPolicy::from_config(&config);
        let delays: Vec<_> = (1..max_retries).map(|n| policy.delay_for(n)).collect();
        for pair in delays.windows(2) {
            prop_assert!(pair[1] > pair[0], "delay did not grow: {:?}", pair);
        }
    }

    #[test]
    fn test_budgets_that_stop_growing_are_rejected(base_ms in 0u64..5_000, max_s in 1u64..900, max_retries in 3u32..40) {
        let config = SyncConfig {
            base_delay: Duration::from_millis(base_ms),
            max_delay: Duration::from_secs(max_s),
            max_retries,
            ..SyncConfig::default()
        };
        let policy = RetryPolicy::from_config(&config);
        let stalls = (2..max_retries).any(|n| policy.delay_for(n) <= policy.delay_for(n - 1));
        prop_assume!(stalls);
        prop_assert!(config.validate().is_err());
    }

    #[test]
    fn test_budget_is_exhausted_exactly_at_max(max_retries in 1u32..20, retry_count in 0u32..40) {
        let policy = RetryPolicy::default();
        prop_assert_eq!(policy.is_exhausted(retry_count, max_retries), retry_count >= max_retries);
    }

    #[test]
    fn test_latest_write_wins(local_s in 0i64..1_000_000, remote_s in 0i64..1_000_000) {
        let origin = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let local = origin + TimeDelta::seconds(local_s);
        let remote = origin + TimeDelta::seconds(remote_s);

        let expected = if local > remote { Winner::Local } else { Winner::Remote };
        prop_assert_eq!(last_write_wins(local, Some(remote)), expected);
        prop_assert_eq!(last_write_wins(local, None), Winner::Local);
    }
}
