//! # Operation Queue
//!
//! Durable, ordered log of pending mutations. Every entry lives in the
//! [`SyncStore`] so the queue survives restarts; the queue itself holds no
//! state besides a lock that serializes status transitions.
//!
//! ## Features
//!
//! - **Atomic Enqueue**: the local record write and the queue entry land in
//!   one store batch, or neither does
//! - **FIFO Order**: entries come back oldest first, ties in append order
//! - **Status Tracking**: pending, processing, completed, failed, conflicted
//! - **Backoff**: transient failures reschedule the entry instead of sleeping
//! - **Recovery**: entries left `processing` by a crash return to `pending`
//! - **Cleanup**: completed entries are archived, then purged
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fintrack_sync::local_db::memory::MemoryStore;
//! use fintrack_sync::offline::queue::OperationQueue;
//! use fintrack_sync::offline::retry::RetryPolicy;
//! use fintrack_sync::shared::clock::SystemClock;
//! use fintrack_sync::shared::entity::EntityType;
//! use fintrack_sync::shared::operation::OperationType;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), fintrack_sync::shared::error::SyncError> {
//! let queue = OperationQueue::new(Arc::new(MemoryStore::new()), RetryPolicy::default(), Arc::new(SystemClock));
//!
//! let payload = serde_json::json!({
//!     "role": "personal", "kind": "expense", "amount": 500, "currency": "KES",
//!     "category_id": null, "description": "lunch", "occurred_on": "2026-10-19"
//! });
//! let id = queue.enqueue(OperationType::Create, EntityType::Transaction, "t1", payload).await?;
//! queue.mark_processing(id).await?;
//! queue.mark_completed(id, "v1").await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::local_db::store::{StoreWrite, SyncStore};
use crate::offline::reconciliation::ReconciliationOutcome;
use crate::offline::retry::RetryPolicy;
use crate::shared::clock::Clock;
use crate::shared::entity::{EntityBody, EntityRecord, EntityType};
use crate::shared::error::{SharedError, SyncError};
use crate::shared::operation::{OperationStatus, OperationType, QueuedOperation, SyncConflict};

/// Counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub conflicted: usize,
}

impl QueueStats {
    pub fn from_operations(operations: &[QueuedOperation]) -> Self {
        let mut stats = Self::default();
        for op in operations {
            match op.status {
                OperationStatus::Pending => stats.pending += 1,
                OperationStatus::Processing => stats.processing += 1,
                OperationStatus::Completed => stats.completed += 1,
                OperationStatus::Failed => stats.failed += 1,
                OperationStatus::Conflicted => stats.conflicted += 1,
            }
        }
        stats
    }

    /// Entries that still have to reach the remote
    pub fn outstanding(&self) -> usize {
        self.pending + self.processing
    }
}

/// Operation queue over a durable store
#[derive(Debug)]
pub struct OperationQueue {
    store: Arc<dyn SyncStore>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    /// Serializes read-modify-write status transitions
    transitions: Mutex<()>,
}

impl OperationQueue {
    pub fn new(store: Arc<dyn SyncStore>, policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            policy,
            clock,
            transitions: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SyncStore> {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record a local mutation and queue it for the remote
    ///
    /// For create and update the payload holds the entity's domain fields and
    /// becomes the new local record. A delete removes the local record and
    /// queues `{"id": entity_id}`. Fails only on invalid input or when the
    /// store cannot be written.
    pub async fn enqueue(
        &self,
        operation_type: OperationType,
        entity_type: EntityType,
        entity_id: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, SyncError> {
        if entity_id.trim().is_empty() {
            return Err(SharedError::validation("entity_id", "must not be empty").into());
        }

        let _guard = self.transitions.lock().await;
        let now = self.clock.now();
        let existing = self.store.get(entity_id).await?;

        if let Some(record) = &existing {
            if record.entity_type() != entity_type {
                return Err(SharedError::validation(
                    "entity_type",
                    format!("{} is a {}, not a {}", entity_id, record.entity_type(), entity_type),
                )
                .into());
            }
        }

        let assumed_version = existing.as_ref().and_then(|r| r.server_version.clone());
        let (payload, record_write) = match operation_type {
            OperationType::Create | OperationType::Update => {
                let body = EntityBody::from_payload(entity_type, &payload)?;
                let payload = body.to_payload()?;
                let record = match &existing {
                    Some(record) => record.with_local_change(body, now),
                    None => EntityRecord::new_local(entity_id, body, now),
                };
                (payload, StoreWrite::PutRecord(record))
            }
            OperationType::Delete => (
                serde_json::json!({ "id": entity_id }),
                StoreWrite::DeleteRecord(entity_id.to_string()),
            ),
        };

        let op = QueuedOperation::new(
            operation_type,
            entity_type,
            entity_id,
            payload,
            self.policy.max_retries,
            now,
        )
        .with_assumed_version(assumed_version);
        let id = op.id;

        if let Err(e) = self
            .store
            .commit(vec![record_write, StoreWrite::SaveOperation(op)])
            .await
        {
            tracing::error!(entity_id, error = %e, "Failed to enqueue operation");
            return Err(e.into());
        }

        tracing::info!(%id, %operation_type, %entity_type, entity_id, "Enqueued operation");
        Ok(id)
    }

    /// Look up one entry
    pub async fn operation(&self, id: Uuid) -> Result<QueuedOperation, SyncError> {
        self.store
            .operation(id)
            .await?
            .ok_or(SyncError::OperationNotFound(id))
    }

    /// Every entry, oldest first
    pub async fn operations(&self) -> Result<Vec<QueuedOperation>, SyncError> {
        Ok(self.store.operations(None).await?)
    }

    /// All pending entries, oldest first, including those inside a backoff window
    pub async fn pending(&self) -> Result<Vec<QueuedOperation>, SyncError> {
        Ok(self.store.operations(Some(OperationStatus::Pending)).await?)
    }

    /// Pending entries eligible now, oldest first
    pub async fn dequeue_due(&self) -> Result<Vec<QueuedOperation>, SyncError> {
        let now = self.clock.now();
        let mut pending = self.pending().await?;
        pending.retain(|op| op.is_due(now));
        Ok(pending)
    }

    pub async fn mark_processing(&self, id: Uuid) -> Result<QueuedOperation, SyncError> {
        let _guard = self.transitions.lock().await;
        let mut op = self.operation(id).await?;
        expect_status(&op, &[OperationStatus::Pending], "processing")?;

        op.status = OperationStatus::Processing;
        op.last_attempt_at = Some(self.clock.now());
        self.save(&op).await?;

        tracing::debug!(%id, entity_id = %op.entity_id, "Operation processing");
        Ok(op)
    }

    /// Archive an acknowledged entry and update its record
    ///
    /// The record is marked clean only when no other open entry targets the
    /// same entity; pending successors are rebased onto `server_version`.
    /// Returns `false` when the entry was already completed.
    pub async fn mark_completed(&self, id: Uuid, server_version: &str) -> Result<bool, SyncError> {
        let _guard = self.transitions.lock().await;
        let mut op = self.operation(id).await?;

        if op.status == OperationStatus::Completed {
            tracing::debug!(%id, "Operation already completed");
            return Ok(false);
        }
        expect_status(&op, &[OperationStatus::Pending, OperationStatus::Processing], "completion")?;

        let now = self.clock.now();
        op.status = OperationStatus::Completed;
        op.completed_at = Some(now);
        op.last_error = None;

        let successors: Vec<QueuedOperation> = self
            .store
            .operations(None)
            .await?
            .into_iter()
            .filter(|o| o.entity_id == op.entity_id && o.id != op.id && o.status.is_open())
            .collect();

        let mut writes = Vec::with_capacity(successors.len() + 2);

        if op.operation_type != OperationType::Delete {
            if let Some(mut record) = self.store.get(&op.entity_id).await? {
                if successors.is_empty() {
                    record.mark_clean(server_version, now);
                } else {
                    record.server_version = Some(server_version.to_string());
                    record.synced_at = Some(now);
                }
                writes.push(StoreWrite::PutRecord(record));
            }
        }

        writes.extend(rebase_successors(successors, server_version));
        writes.push(StoreWrite::SaveOperation(op.clone()));
        self.store.commit(writes).await?;

        tracing::info!(%id, entity_id = %op.entity_id, server_version, "Operation completed");
        Ok(true)
    }

    /// Terminal failure; no retry budget is consulted
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> Result<QueuedOperation, SyncError> {
        let _guard = self.transitions.lock().await;
        let mut op = self.operation(id).await?;
        expect_status(&op, &[OperationStatus::Pending, OperationStatus::Processing], "failure")?;

        op.status = OperationStatus::Failed;
        op.last_error = Some(error.to_string());
        self.save(&op).await?;

        tracing::warn!(%id, entity_id = %op.entity_id, error, "Operation failed");
        Ok(op)
    }

    /// Count a transient failure and schedule the next attempt
    ///
    /// Escalates to `failed` once `retry_count` reaches `max_retries`.
    pub async fn mark_pending_with_backoff(&self, id: Uuid, error: &str) -> Result<QueuedOperation, SyncError> {
        let _guard = self.transitions.lock().await;
        let mut op = self.operation(id).await?;
        expect_status(&op, &[OperationStatus::Pending, OperationStatus::Processing], "retry")?;

        op.retry_count = op.retry_count.saturating_add(1);
        op.last_error = Some(error.to_string());

        if self.policy.is_exhausted(op.retry_count, op.max_retries) {
            op.status = OperationStatus::Failed;
            tracing::warn!(
                %id,
                entity_id = %op.entity_id,
                retry_count = op.retry_count,
                error,
                "Retry budget exhausted, operation failed"
            );
        } else {
            op.status = OperationStatus::Pending;
            op.next_attempt_at = self.policy.next_attempt_at(self.clock.now(), op.retry_count);
            tracing::warn!(
                %id,
                entity_id = %op.entity_id,
                retry_count = op.retry_count,
                next_attempt_at = %op.next_attempt_at,
                error,
                "Operation rescheduled"
            );
        }

        self.save(&op).await?;
        Ok(op)
    }

    /// Hold an entry until its conflict is resolved
    pub async fn mark_conflicted(&self, id: Uuid, conflict: SyncConflict) -> Result<QueuedOperation, SyncError> {
        let _guard = self.transitions.lock().await;
        let mut op = self.operation(id).await?;
        expect_status(&op, &[OperationStatus::Pending, OperationStatus::Processing], "conflict")?;

        op.status = OperationStatus::Conflicted;
        op.last_error = Some(format!(
            "remote is at version {}, operation assumed {}",
            conflict.remote_version,
            conflict.local_version.as_deref().unwrap_or("none")
        ));

        self.store
            .commit(vec![
                StoreWrite::SaveOperation(op.clone()),
                StoreWrite::SaveConflict(conflict),
            ])
            .await?;

        tracing::warn!(%id, entity_id = %op.entity_id, "Operation conflicted");
        Ok(op)
    }

    /// Apply a conflict decision to the queue and the local record
    pub async fn apply_resolution(
        &self,
        conflict: &SyncConflict,
        outcome: ReconciliationOutcome,
    ) -> Result<(), SyncError> {
        let _guard = self.transitions.lock().await;
        let now = self.clock.now();
        let mut writes = vec![StoreWrite::RemoveConflict(conflict.entity_id.clone())];

        match outcome {
            ReconciliationOutcome::KeepLocal { assumed_version } => {
                let mut op = self.operation(conflict.operation_id).await?;
                expect_status(&op, &[OperationStatus::Conflicted], "local resolution")?;

                op.status = OperationStatus::Pending;
                op.assumed_version = Some(assumed_version);
                op.next_attempt_at = now;
                op.last_error = None;
                writes.push(StoreWrite::SaveOperation(op));
            }
            ReconciliationOutcome::AdoptRemote { record } => {
                match record {
                    Some(mut record) => {
                        record.is_dirty = false;
                        record.synced_at = Some(now);
                        record.server_version = Some(conflict.remote_version.clone());
                        writes.push(StoreWrite::PutRecord(record));
                    }
                    None => writes.push(StoreWrite::DeleteRecord(conflict.entity_id.clone())),
                }

                let dropped = self
                    .store
                    .operations(None)
                    .await?
                    .into_iter()
                    .filter(|o| o.entity_id == conflict.entity_id && o.status.is_open());
                for op in dropped {
                    writes.push(StoreWrite::RemoveOperation(op.id));
                }
            }
        }

        self.store.commit(writes).await?;
        Ok(())
    }

    /// Reset entries left `processing` by an interrupted session
    pub async fn recover(&self) -> Result<usize, SyncError> {
        let _guard = self.transitions.lock().await;
        let stranded = self.store.operations(Some(OperationStatus::Processing)).await?;
        let count = stranded.len();

        if count > 0 {
            let writes = stranded
                .into_iter()
                .map(|mut op| {
                    op.status = OperationStatus::Pending;
                    StoreWrite::SaveOperation(op)
                })
                .collect();
            self.store.commit(writes).await?;
            tracing::info!(count, "Recovered interrupted operations");
        }

        Ok(count)
    }

    /// Give a failed entry a fresh retry budget
    pub async fn retry_failed(&self, id: Uuid) -> Result<QueuedOperation, SyncError> {
        let _guard = self.transitions.lock().await;
        let mut op = self.operation(id).await?;
        expect_status(&op, &[OperationStatus::Failed], "retry")?;

        op.status = OperationStatus::Pending;
        op.retry_count = 0;
        op.next_attempt_at = self.clock.now();
        op.last_error = None;
        self.save(&op).await?;

        tracing::info!(%id, entity_id = %op.entity_id, "Failed operation requeued");
        Ok(op)
    }

    /// Drop a failed or conflicted entry
    ///
    /// The local record keeps its changes and stays dirty.
    pub async fn discard(&self, id: Uuid) -> Result<QueuedOperation, SyncError> {
        let _guard = self.transitions.lock().await;
        let op = self.operation(id).await?;
        expect_status(&op, &[OperationStatus::Failed, OperationStatus::Conflicted], "discard")?;

        let mut writes = vec![StoreWrite::RemoveOperation(id)];
        if let Some(conflict) = self.store.conflict(&op.entity_id).await? {
            if conflict.operation_id == id {
                writes.push(StoreWrite::RemoveConflict(op.entity_id.clone()));
            }
        }
        self.store.commit(writes).await?;

        tracing::info!(%id, entity_id = %op.entity_id, "Operation discarded");
        Ok(op)
    }

    /// Delete completed entries archived before `cutoff`
    pub async fn purge_completed(&self, cutoff: DateTime<Utc>) -> Result<usize, SyncError> {
        let _guard = self.transitions.lock().await;
        let writes: Vec<StoreWrite> = self
            .store
            .operations(Some(OperationStatus::Completed))
            .await?
            .into_iter()
            .filter(|op| op.completed_at.map_or(true, |at| at < cutoff))
            .map(|op| StoreWrite::RemoveOperation(op.id))
            .collect();

        let count = writes.len();
        if count > 0 {
            self.store.commit(writes).await?;
            tracing::debug!(count, "Purged completed operations");
        }
        Ok(count)
    }

    pub async fn stats(&self) -> Result<QueueStats, SyncError> {
        let operations = self.store.operations(None).await?;
        Ok(QueueStats::from_operations(&operations))
    }

    async fn save(&self, op: &QueuedOperation) -> Result<(), SyncError> {
        self.store.commit(vec![StoreWrite::SaveOperation(op.clone())]).await?;
        Ok(())
    }
}

/// Point pending successors of an acknowledged entry at the new version
pub fn rebase_successors(successors: Vec<QueuedOperation>, server_version: &str) -> Vec<StoreWrite> {
    successors
        .into_iter()
        .filter(|op| op.status == OperationStatus::Pending)
        .map(|mut op| {
            op.assumed_version = Some(server_version.to_string());
            StoreWrite::SaveOperation(op)
        })
        .collect()
}

fn expect_status(op: &QueuedOperation, allowed: &[OperationStatus], action: &'static str) -> Result<(), SyncError> {
    if allowed.contains(&op.status) {
        Ok(())
    } else {
        Err(SyncError::InvalidTransition {
            id: op.id,
            status: op.status.to_string(),
            action,
        })
    }
}
