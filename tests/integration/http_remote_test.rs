//! HTTP remote against a mock server

use std::sync::Arc;
use std::time::Duration;

use fintrack_sync::local_db::memory::MemoryStore;
use fintrack_sync::local_db::store::EntityStore;
use fintrack_sync::remote_client::{ApplyRequest, ApplyResponse, HttpRemote, RemoteApply, RemoteError};
use fintrack_sync::shared::entity::EntityType;
use fintrack_sync::shared::operation::OperationType;
use fintrack_sync::sync::sync_state::SyncStatus;
use fintrack_sync::sync::SyncService;
use pretty_assertions::assert_eq;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::*;
use crate::{assert_err, assert_status};

fn request(entity_id: &str) -> ApplyRequest {
    ApplyRequest {
        operation_id: Uuid::new_v4(),
        operation_type: OperationType::Create,
        entity_type: EntityType::Transaction,
        entity_id: entity_id.to_string(),
        payload: transaction_payload(500),
        assumed_version: None,
    }
}

async fn respond_with(template: ResponseTemplate) -> (MockServer, HttpRemote) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/operations"))
        .respond_with(template)
        .mount(&server)
        .await;
    let remote = HttpRemote::new(&server.uri(), Duration::from_millis(500)).unwrap();
    (server, remote)
}

#[tokio::test]
async fn test_ok_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/operations"))
        .and(body_partial_json(json!({"type": "create", "entityType": "transaction", "entityId": "t1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "serverVersion": "v1"})))
        .expect(1)
        .mount(&server)
        .await;

    let remote = HttpRemote::new(&server.uri(), Duration::from_secs(2)).unwrap();
    assert_eq!(remote.apply(&request("t1")).await, Ok(ApplyResponse::ok("v1")));
}

#[tokio::test]
async fn test_conflict_response() {
    let (_server, remote) = respond_with(ResponseTemplate::new(409).set_body_json(json!({
        "status": "conflict",
        "serverVersion": "v5",
        "record": transaction_payload(900),
        "updatedAt": "2026-10-18T09:30:00Z"
    })))
    .await;

    match remote.apply(&request("t1")).await {
        Ok(ApplyResponse::Conflict {
            server_version,
            record,
            updated_at,
            deleted,
        }) => {
            assert_eq!(server_version, "v5");
            assert_eq!(record.unwrap()["amount"], 900);
            assert!(updated_at.is_some());
            assert!(!deleted);
        }
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failure_classification() {
    let (_server, remote) = respond_with(ResponseTemplate::new(503).set_body_string("maintenance")).await;
    assert_err!(remote.apply(&request("t1")).await, RemoteError::Transient(_));

    let (_server, remote) = respond_with(ResponseTemplate::new(429)).await;
    assert_err!(remote.apply(&request("t1")).await, RemoteError::Transient(_));

    let (_server, remote) = respond_with(ResponseTemplate::new(422).set_body_string("amount must be positive")).await;
    match remote.apply(&request("t1")).await {
        Err(RemoteError::Permanent(message)) => assert!(message.contains("amount must be positive")),
        other => panic!("expected permanent failure, got {:?}", other),
    }

    let (_server, remote) = respond_with(ResponseTemplate::new(200).set_body_string("<html>")).await;
    assert_err!(remote.apply(&request("t1")).await, RemoteError::Transient(_));

    let (_server, remote) = respond_with(ResponseTemplate::new(409).set_body_string("version mismatch")).await;
    match remote.apply(&request("t1")).await {
        Err(RemoteError::Permanent(message)) => assert!(message.contains("conflict")),
        other => panic!("expected permanent failure, got {:?}", other),
    }

    let (_server, remote) =
        respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2))).await;
    assert_err!(remote.apply(&request("t1")).await, RemoteError::Transient(_));
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    let remote = HttpRemote::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
    assert_err!(remote.apply(&request("t1")).await, RemoteError::Transient(_));
}

#[tokio::test]
async fn test_service_retries_through_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sync/operations"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sync/operations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok", "serverVersion": "v1"})))
        .mount(&server)
        .await;

    let store = MemoryStore::new();
    let clock = ManualClock::new();
    let remote = HttpRemote::new(&server.uri(), Duration::from_secs(2)).unwrap();
    let service = SyncService::with_clock(
        Arc::new(store.clone()),
        Arc::new(remote),
        test_config(),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();

    service
        .enqueue_operation(OperationType::Create, EntityType::Transaction, "t1", transaction_payload(250))
        .await
        .unwrap();

    service.trigger_manual_sync().await.unwrap();
    assert_status!(service, SyncStatus::Syncing, pending = 1, failed = 0);

    clock.advance(Duration::from_secs(1));
    service.trigger_manual_sync().await.unwrap();
    assert_status!(service, SyncStatus::Synced, pending = 0, failed = 0);
    assert_eq!(store.get("t1").await.unwrap().unwrap().server_version.as_deref(), Some("v1"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_unreadable_conflict_fails_without_retrying() {
    let (server, remote) = respond_with(ResponseTemplate::new(409).set_body_string("version mismatch")).await;
    let store = MemoryStore::new();
    let clock = ManualClock::new();
    let service = SyncService::with_clock(
        Arc::new(store.clone()),
        Arc::new(remote),
        test_config(),
        Arc::new(clock.clone()),
    )
    .await
    .unwrap();

    let id = service
        .enqueue_operation(OperationType::Update, EntityType::Transaction, "t1", transaction_payload(250))
        .await
        .unwrap();

    service.trigger_manual_sync().await.unwrap();
    assert_status!(service, SyncStatus::SyncError, pending = 0, failed = 1);
    let op = service.queue().operation(id).await.unwrap();
    assert_eq!(op.retry_count, 0);

    clock.advance(Duration::from_secs(600));
    service.trigger_manual_sync().await.unwrap();
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
