//! Drain pass behavior: offline queueing, retries, ordering, failures

use std::time::Duration;

use fintrack_sync::local_db::memory::MemoryStore;
use fintrack_sync::local_db::store::EntityStore;
use fintrack_sync::shared::clock::Clock;
use fintrack_sync::shared::entity::{EntityFilter, EntityType};
use fintrack_sync::shared::error::SyncError;
use fintrack_sync::shared::operation::{OperationStatus, OperationType};
use fintrack_sync::sync::engine::{PassOutcome, SkipReason};
use fintrack_sync::sync::sync_state::SyncStatus;
use pretty_assertions::assert_eq;

use crate::common::*;
use crate::{assert_contains, assert_err, assert_ok, assert_status};

#[tokio::test]
async fn test_offline_writes_sync_after_reconnect() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;

    service.set_online(false).await;
    let id = assert_ok!(
        service
            .enqueue_operation(OperationType::Create, EntityType::Transaction, "t1", transaction_payload(1200))
            .await
    );

    assert_status!(service, SyncStatus::Offline, pending = 1, failed = 0);
    assert!(store.get("t1").await.unwrap().unwrap().is_dirty);
    assert_eq!(
        service.trigger_manual_sync().await.unwrap(),
        PassOutcome::Skipped(SkipReason::Offline)
    );
    assert_eq!(remote.calls(), 0);

    assert!(service.set_online(true).await);

    let status = assert_status!(service, SyncStatus::Synced, pending = 0, failed = 0);
    assert!(status.last_sync_time.is_some());
    let record = store.get("t1").await.unwrap().unwrap();
    assert!(!record.is_dirty);
    assert_eq!(record.server_version.as_deref(), Some("v1"));
    assert_eq!(service.queue().operation(id).await.unwrap().status, OperationStatus::Completed);
}

#[tokio::test]
async fn test_timeout_then_success() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    remote.stall(Duration::from_secs(2));
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;

    let id = service
        .enqueue_operation(OperationType::Create, EntityType::Category, "c1", category_payload("Stock"))
        .await
        .unwrap();

    let report = *service.trigger_manual_sync().await.unwrap().report().unwrap();
    assert_eq!(report.retried, 1);

    let op = service.queue().operation(id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.retry_count, 1);
    assert_eq!(op.next_attempt_at, clock.now() + chrono::Duration::seconds(1));
    assert_contains!(op.last_error.unwrap(), "timed out");
    assert_status!(service, SyncStatus::Syncing, pending = 1, failed = 0);

    // Not due yet
    let report = *service.trigger_manual_sync().await.unwrap().report().unwrap();
    assert_eq!(report.attempted, 0);
    assert_eq!(report.deferred, 1);

    clock.advance(Duration::from_secs(1));
    let report = *service.trigger_manual_sync().await.unwrap().report().unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(remote.calls(), 2);
    assert_status!(service, SyncStatus::Synced, pending = 0, failed = 0);
}

#[tokio::test]
async fn test_retry_budget_escalates_to_failed() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    remote.transient("503 unavailable").transient("503 unavailable").transient("503 unavailable");
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;

    let id = service
        .enqueue_operation(OperationType::Create, EntityType::Transaction, "t1", transaction_payload(300))
        .await
        .unwrap();

    for delay in [1, 2] {
        service.trigger_manual_sync().await.unwrap();
        assert_eq!(service.queue().operation(id).await.unwrap().status, OperationStatus::Pending);
        clock.advance(Duration::from_secs(delay));
    }
    service.trigger_manual_sync().await.unwrap();

    let op = service.queue().operation(id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.retry_count, 3);
    let status = assert_status!(service, SyncStatus::SyncError, pending = 0, failed = 1);
    assert_eq!(status.last_error.as_deref(), Some("503 unavailable"));

    // Failed entries are not retried by later passes
    service.trigger_manual_sync().await.unwrap();
    assert_eq!(remote.calls(), 3);

    let op = service.retry_failed(id).await.unwrap();
    assert_eq!(op.retry_count, 0);
    service.trigger_manual_sync().await.unwrap();
    assert_status!(service, SyncStatus::Synced, pending = 0, failed = 0);
}

#[tokio::test]
async fn test_backoff_holds_back_only_its_entity() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    remote.transient("connection reset");
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;

    service
        .enqueue_operation(OperationType::Create, EntityType::Transaction, "t1", transaction_payload(100))
        .await
        .unwrap();
    service
        .enqueue_operation(OperationType::Create, EntityType::Category, "c1", category_payload("Rent"))
        .await
        .unwrap();
    service
        .enqueue_operation(OperationType::Update, EntityType::Transaction, "t1", transaction_payload(150))
        .await
        .unwrap();

    let report = *service.trigger_manual_sync().await.unwrap().report().unwrap();
    assert_eq!((report.retried, report.applied, report.deferred), (1, 1, 1));
    let sent: Vec<_> = remote.requests().iter().map(|r| r.entity_id.clone()).collect();
    assert_eq!(sent, vec!["t1", "c1"]);

    clock.advance(Duration::from_secs(1));
    service.trigger_manual_sync().await.unwrap();

    let requests = remote.requests();
    assert_eq!(requests.len(), 4);
    assert_eq!(requests[2].operation_type, OperationType::Create);
    assert_eq!(requests[3].operation_type, OperationType::Update);
    // The update is rebased onto the version the create produced
    assert_eq!(requests[3].assumed_version.as_deref(), Some("v2"));

    let record = store.get("t1").await.unwrap().unwrap();
    assert!(!record.is_dirty);
    assert_eq!(record.server_version.as_deref(), Some("v3"));
}

#[tokio::test]
async fn test_permanent_failure_and_discard() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    remote.permanent("422 amount must be positive");
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;

    let id = service
        .enqueue_operation(OperationType::Create, EntityType::Transaction, "t1", transaction_payload(-5))
        .await
        .unwrap();
    service.trigger_manual_sync().await.unwrap();

    let status = assert_status!(service, SyncStatus::SyncError, pending = 0, failed = 1);
    assert_contains!(status.last_error.unwrap(), "422");
    assert_eq!(service.queue().operation(id).await.unwrap().retry_count, 0);

    service.discard_operation(id).await.unwrap();
    assert_status!(service, SyncStatus::Synced, pending = 0, failed = 0);
    // The local edit is kept, unsynced
    assert!(store.get("t1").await.unwrap().unwrap().is_dirty);
    assert_err!(service.discard_operation(id).await, SyncError::OperationNotFound(_));
}

#[tokio::test]
async fn test_delete_is_queued_after_create() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;

    service
        .enqueue_operation(OperationType::Create, EntityType::GroupContribution, "g1", contribution_payload("Wanjiru", 2000))
        .await
        .unwrap();
    service.trigger_manual_sync().await.unwrap();

    let week = store.get_all(&EntityFilter::all().week("2026-W42")).await.unwrap();
    assert_eq!(week.len(), 1);

    service
        .enqueue_operation(OperationType::Delete, EntityType::GroupContribution, "g1", serde_json::Value::Null)
        .await
        .unwrap();
    assert!(store.get("g1").await.unwrap().is_none());

    service.trigger_manual_sync().await.unwrap();
    let delete = remote.requests().pop().unwrap();
    assert_eq!(delete.operation_type, OperationType::Delete);
    assert_eq!(delete.payload, serde_json::json!({"id": "g1"}));
    assert_eq!(delete.assumed_version.as_deref(), Some("v1"));
    assert_status!(service, SyncStatus::Synced);
}

#[tokio::test]
async fn test_concurrent_triggers_run_one_pass() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    remote.stall(Duration::from_millis(100));
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;

    service
        .enqueue_operation(OperationType::Create, EntityType::Transaction, "t1", transaction_payload(100))
        .await
        .unwrap();

    let (first, second) = tokio::join!(service.trigger_manual_sync(), service.trigger_manual_sync());
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.report().is_some()).count(), 1);
    assert!(outcomes.contains(&PassOutcome::Skipped(SkipReason::AlreadyRunning)));
    assert_eq!(remote.calls(), 1);
}

#[tokio::test]
async fn test_enqueue_reports_unavailable_store() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;

    store.set_available(false);
    let result = service
        .enqueue_operation(OperationType::Create, EntityType::Category, "c1", category_payload("Fuel"))
        .await;
    assert_err!(result, SyncError::Storage(_));

    store.set_available(true);
    assert!(store.get("c1").await.unwrap().is_none());
    assert!(service.operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_payload_is_rejected() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;

    let result = service
        .enqueue_operation(OperationType::Create, EntityType::Category, "c1", serde_json::json!({"name": 7}))
        .await;
    assert_err!(result, SyncError::Shared(_));

    let result = service
        .enqueue_operation(OperationType::Create, EntityType::Category, " ", category_payload("Fuel"))
        .await;
    assert_err!(result, SyncError::Shared(_));
    assert!(service.operations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_subscribers_see_queue_changes() {
    let store = MemoryStore::new();
    let remote = ScriptedRemote::new();
    let clock = ManualClock::new();
    let service = memory_service(&store, &remote, &clock, test_config()).await;
    let mut receiver = service.subscribe();

    service
        .enqueue_operation(OperationType::Create, EntityType::Category, "c1", category_payload("Airtime"))
        .await
        .unwrap();
    assert!(receiver.has_changed().unwrap());
    {
        let status = receiver.borrow_and_update();
        assert_eq!(status.sync_status, SyncStatus::Syncing);
        assert_eq!(status.pending_operations, 1);
    }

    service.trigger_manual_sync().await.unwrap();
    assert!(receiver.has_changed().unwrap());
    assert_eq!(receiver.borrow_and_update().sync_status, SyncStatus::Synced);
}
