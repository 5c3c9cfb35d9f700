//! # Conflict Resolution
//!
//! Records version conflicts reported by the remote and applies resolutions
//! to them, either on request or automatically under a configured policy.
//!
//! ## Features
//!
//! - **Detection**: builds a [`SyncConflict`] from a conflict response,
//!   capturing both the local record and the remote copy
//! - **Automatic Resolution**: applies the configured policy right after
//!   detection
//! - **Manual Override**: conflicts without a policy wait for
//!   `resolve` and block later operations on the same entity

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::offline::queue::OperationQueue;
use crate::offline::reconciliation::{reconcile, ReconciliationOutcome};
use crate::shared::entity::{EntityBody, EntityRecord};
use crate::shared::error::SyncError;
use crate::shared::operation::{ConflictResolution, QueuedOperation, SyncConflict};

/// Remote side of a conflict response
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConflict {
    pub server_version: String,
    pub record: Option<serde_json::Value>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

/// Build the conflict entry for `op`
///
/// A remote copy without a timestamp is dated at the earliest instant so a
/// last-write-wins merge keeps the local side.
pub fn build_conflict(
    op: &QueuedOperation,
    local_record: Option<EntityRecord>,
    remote: RemoteConflict,
    now: DateTime<Utc>,
) -> SyncConflict {
    let remote_record = remote.record.as_ref().and_then(|payload| {
        match EntityBody::from_payload(op.entity_type, payload) {
            Ok(body) => Some(EntityRecord::from_remote(
                op.entity_id.clone(),
                body,
                remote.updated_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
                remote.server_version.clone(),
                now,
            )),
            Err(e) => {
                tracing::warn!(entity_id = %op.entity_id, error = %e, "Ignoring undecodable remote record");
                None
            }
        }
    });

    SyncConflict {
        entity_id: op.entity_id.clone(),
        entity_type: op.entity_type,
        operation_id: op.id,
        local_version: op.assumed_version.clone(),
        remote_version: remote.server_version,
        local_record,
        remote_record,
        remote_deleted: remote.deleted,
        detected_at: now,
    }
}

/// Conflict resolution manager
#[derive(Debug)]
pub struct ConflictResolver {
    queue: Arc<OperationQueue>,
    /// `None` leaves every conflict for a manual decision
    policy: Option<ConflictResolution>,
}

impl ConflictResolver {
    pub fn new(queue: Arc<OperationQueue>, policy: Option<ConflictResolution>) -> Self {
        Self { queue, policy }
    }

    pub fn policy(&self) -> Option<ConflictResolution> {
        self.policy
    }

    /// Conflicts waiting for a decision
    pub async fn conflicts(&self) -> Result<Vec<SyncConflict>, SyncError> {
        Ok(self.queue.store().conflicts().await?)
    }

    /// Resolve the pending conflict of `entity_id`
    pub async fn resolve(
        &self,
        entity_id: &str,
        resolution: ConflictResolution,
    ) -> Result<ReconciliationOutcome, SyncError> {
        let conflict = self
            .queue
            .store()
            .conflict(entity_id)
            .await?
            .ok_or_else(|| SyncError::ConflictNotFound(entity_id.to_string()))?;
        let op = self.queue.operation(conflict.operation_id).await?;

        let local_updated_at = self
            .queue
            .store()
            .get(entity_id)
            .await?
            .map(|record| record.updated_at)
            .unwrap_or(op.enqueued_at);

        let outcome = reconcile(resolution, &conflict, local_updated_at)?;
        self.queue.apply_resolution(&conflict, outcome.clone()).await?;

        let kept = match &outcome {
            ReconciliationOutcome::KeepLocal { .. } => "local",
            ReconciliationOutcome::AdoptRemote { .. } => "remote",
        };
        tracing::info!(entity_id, %resolution, kept, "Conflict resolved");
        Ok(outcome)
    }

    /// Apply the configured policy, if any
    ///
    /// A resolution that needs data the conflict lacks is left for a manual
    /// decision rather than failing the pass.
    pub async fn auto_resolve(&self, entity_id: &str) -> Result<Option<ReconciliationOutcome>, SyncError> {
        let Some(policy) = self.policy else {
            tracing::info!(entity_id, "Conflict awaiting manual resolution");
            return Ok(None);
        };

        match self.resolve(entity_id, policy).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(SyncError::ResolutionUnavailable { reason, .. }) => {
                tracing::warn!(entity_id, %policy, reason, "Automatic resolution not possible");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
