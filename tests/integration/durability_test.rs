//! Queue durability across restarts, backed by a SQLite file

use std::path::Path;
use std::sync::Arc;

use fintrack_sync::local_db::store::EntityStore;
use fintrack_sync::local_db::LocalDatabase;
use fintrack_sync::shared::entity::EntityType;
use fintrack_sync::shared::operation::{OperationStatus, OperationType};
use fintrack_sync::sync::sync_state::SyncStatus;
use fintrack_sync::sync::SyncService;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use crate::assert_status;
use crate::common::*;

async fn open_service(path: &Path, remote: &Arc<ScriptedRemote>, clock: &ManualClock) -> (SyncService, LocalDatabase) {
    let db = LocalDatabase::open(path).await.unwrap();
    let service = SyncService::with_clock(
        Arc::new(db.clone()),
        remote.clone(),
        test_config(),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();
    (service, db)
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fintrack").join("sync.db");
    let remote = ScriptedRemote::new();
    let clock = ManualClock::new();

    let (service, db) = open_service(&path, &remote, &clock).await;
    service.set_online(false).await;
    let first = service
        .enqueue_operation(OperationType::Create, EntityType::Transaction, "t1", transaction_payload(700))
        .await
        .unwrap();
    service
        .enqueue_operation(OperationType::Create, EntityType::Category, "c1", category_payload("Utilities"))
        .await
        .unwrap();
    drop(service);
    db.close().await;

    let (service, db) = open_service(&path, &remote, &clock).await;
    let operations = service.operations().await.unwrap();
    assert_eq!(operations.len(), 2);
    assert_eq!(operations[0].id, first);
    assert!(operations.iter().all(|op| op.status == OperationStatus::Pending));
    assert!(db.get("t1").await.unwrap().unwrap().is_dirty);
    assert_status!(service, SyncStatus::Syncing, pending = 2, failed = 0);

    service.trigger_manual_sync().await.unwrap();
    assert_status!(service, SyncStatus::Synced, pending = 0, failed = 0);
    assert!(!db.get("c1").await.unwrap().unwrap().is_dirty);
    assert_eq!(remote.requests()[0].entity_id, "t1");
}

#[tokio::test]
async fn test_interrupted_operation_is_recovered() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sync.db");
    let remote = ScriptedRemote::new();
    let clock = ManualClock::new();

    let (service, db) = open_service(&path, &remote, &clock).await;
    let id = service
        .enqueue_operation(OperationType::Create, EntityType::Category, "c1", category_payload("Savings"))
        .await
        .unwrap();
    service.queue().mark_pending_with_backoff(id, "connection reset").await.unwrap();
    // Simulates a crash between sending the request and recording the answer
    service.queue().mark_processing(id).await.unwrap();
    drop(service);
    db.close().await;

    let (service, _db) = open_service(&path, &remote, &clock).await;
    let op = service.queue().operation(id).await.unwrap();
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.retry_count, 1);

    clock.advance(std::time::Duration::from_secs(2));
    service.trigger_manual_sync().await.unwrap();
    assert_eq!(service.queue().operation(id).await.unwrap().status, OperationStatus::Completed);
}

#[tokio::test]
async fn test_last_sync_time_persists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sync.db");
    let remote = ScriptedRemote::new();
    let clock = ManualClock::new();

    let (service, db) = open_service(&path, &remote, &clock).await;
    service.trigger_manual_sync().await.unwrap();
    let synced_at = service.status().await.last_sync_time;
    assert!(synced_at.is_some());
    drop(service);
    db.close().await;

    let (service, db) = open_service(&path, &remote, &clock).await;
    assert_eq!(service.status().await.last_sync_time, synced_at);
    assert_eq!(db.get_stats().await.unwrap().queued_operations, 0);
}
