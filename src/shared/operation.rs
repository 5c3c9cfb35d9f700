//! # Queue Operations
//!
//! Pending mutations recorded by the operation queue and the conflict
//! entries produced when the remote rejects one of them.
//!
//! ## Lifecycle
//!
//! ```text
//! pending -> processing -> completed
//!                       -> pending (retry_count + 1, next_attempt_at in the future)
//!                       -> failed (terminal until retried or discarded by the user)
//!                       -> conflicted (held until resolve_conflict)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::shared::entity::{EntityRecord, EntityType};
use crate::shared::error::SharedError;

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            other => Err(SharedError::validation(
                "type",
                format!("unknown operation type '{}'", other),
            )),
        }
    }
}

/// Operation execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Waiting to be applied, possibly inside a backoff window
    Pending,
    /// Currently being applied
    Processing,
    /// Acknowledged by the remote (archived)
    Completed,
    /// Terminal until retried or discarded
    Failed,
    /// Rejected by the remote as stale, awaiting a resolution
    Conflicted,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Processing => "processing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Conflicted => "conflicted",
        }
    }

    /// Whether the entry still holds back later operations on its entity
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OperationStatus::Pending | OperationStatus::Processing | OperationStatus::Conflicted
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OperationStatus::Pending),
            "processing" => Ok(OperationStatus::Processing),
            "completed" => Ok(OperationStatus::Completed),
            "failed" => Ok(OperationStatus::Failed),
            "conflicted" => Ok(OperationStatus::Conflicted),
            other => Err(SharedError::validation(
                "status",
                format!("unknown operation status '{}'", other),
            )),
        }
    }
}

/// Queued mutation with retry metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub id: Uuid,
    pub operation_type: OperationType,
    pub entity_type: EntityType,
    pub entity_id: String,
    /// Full record for create/update, `{"id": ..}` for delete
    pub payload: serde_json::Value,
    /// Remote version this operation was built on
    pub assumed_version: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub status: OperationStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Earliest time the entry may be attempted again
    pub next_attempt_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueuedOperation {
    /// A new pending entry, eligible immediately
    pub fn new(
        operation_type: OperationType,
        entity_type: EntityType,
        entity_id: impl Into<String>,
        payload: serde_json::Value,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation_type,
            entity_type,
            entity_id: entity_id.into(),
            payload,
            assumed_version: None,
            enqueued_at: now,
            status: OperationStatus::Pending,
            retry_count: 0,
            max_retries,
            next_attempt_at: now,
            last_attempt_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    pub fn with_assumed_version(mut self, version: Option<String>) -> Self {
        self.assumed_version = version;
        self
    }

    /// Pending and outside its backoff window
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == OperationStatus::Pending && self.next_attempt_at <= now
    }
}

/// Conflict resolution mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local version and overwrite the remote on the next pass
    Local,
    /// Discard local changes and adopt the remote record
    Remote,
    /// Last write wins by `updated_at`; not a field-level merge
    Merge,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::Local => "local",
            ConflictResolution::Remote => "remote",
            ConflictResolution::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(ConflictResolution::Local),
            "remote" => Ok(ConflictResolution::Remote),
            "merge" => Ok(ConflictResolution::Merge),
            other => Err(SharedError::validation(
                "resolution",
                format!("unknown conflict resolution '{}'", other),
            )),
        }
    }
}

/// Version mismatch reported by the remote for one operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub operation_id: Uuid,
    /// Version the operation assumed
    pub local_version: Option<String>,
    /// Version the remote currently holds
    pub remote_version: String,
    /// Local record at detection time, `None` when deleted locally
    pub local_record: Option<EntityRecord>,
    /// Remote record as reported with the conflict, when sent
    pub remote_record: Option<EntityRecord>,
    /// The remote has deleted the entity
    #[serde(default)]
    pub remote_deleted: bool,
    pub detected_at: DateTime<Utc>,
}
