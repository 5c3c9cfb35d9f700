//! Property-based tests for status derivation

use proptest::prelude::*;

use fintrack_sync::offline::queue::QueueStats;
use fintrack_sync::sync::network_monitor::NetworkState;
use fintrack_sync::sync::sync_state::{derive_status, StatusSnapshot, SyncStatus};

fn stats() -> impl Strategy<Value = QueueStats> {
    (0usize..5, 0usize..3, 0usize..5, 0usize..3, 0usize..3).prop_map(
        |(pending, processing, completed, failed, conflicted)| QueueStats {
            pending,
            processing,
            completed,
            failed,
            conflicted,
        },
    )
}

proptest! {
    #[test]
    fn test_status_follows_priority(online in any::<bool>(), pass_active in any::<bool>(), stats in stats()) {
        let status = derive_status(online, pass_active, &stats);

        let expected = if !online {
            SyncStatus::Offline
        } else if stats.failed > 0 {
            SyncStatus::SyncError
        } else if pass_active || stats.pending + stats.processing > 0 {
            SyncStatus::Syncing
        } else {
            SyncStatus::Synced
        };
        prop_assert_eq!(status, expected);
    }

    #[test]
    fn test_completed_and_conflicted_never_change_status(
        online in any::<bool>(),
        pass_active in any::<bool>(),
        base in stats(),
        completed in 0usize..10,
        conflicted in 0usize..10,
    ) {
        let more = QueueStats { completed, conflicted, ..base };
        prop_assert_eq!(derive_status(online, pass_active, &base), derive_status(online, pass_active, &more));
    }

    #[test]
    fn test_snapshot_counts_match_stats(online in any::<bool>(), stats in stats()) {
        let network = if online { NetworkState::online() } else { NetworkState::offline() };
        let snapshot = StatusSnapshot::build(&network, false, &stats, None, None);

        prop_assert_eq!(snapshot.is_online, online);
        prop_assert_eq!(snapshot.pending_operations, stats.pending + stats.processing);
        prop_assert_eq!(snapshot.failed_operations, stats.failed);
        prop_assert_eq!(snapshot.conflicts, stats.conflicted);
    }
}
