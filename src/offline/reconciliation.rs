//! # State Reconciliation
//!
//! Turns a conflict and a resolution mode into a concrete outcome: either
//! the local version is pushed again on top of the remote version, or the
//! remote copy replaces local state.
//!
//! ## Features
//!
//! - **Local**: re-attempt the local change against the remote version
//! - **Remote**: adopt the remote record (or its deletion) as clean state
//! - **Merge**: last write wins by `updated_at`
//!
//! `Merge` is a whole-record last-write-wins comparison. Fields are never
//! combined. When the remote sent no timestamp the local side wins, and an
//! exact tie goes to the remote.

use chrono::{DateTime, Utc};

use crate::shared::entity::EntityRecord;
use crate::shared::error::SyncError;
use crate::shared::operation::{ConflictResolution, SyncConflict};

/// Side chosen by a last-write-wins comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
}

/// What applying a resolution does to local state
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationOutcome {
    /// Requeue the conflicted operation built on `assumed_version`
    KeepLocal { assumed_version: String },
    /// Replace local state with the remote copy; `None` deletes locally
    AdoptRemote { record: Option<EntityRecord> },
}

/// Compare the last local mutation with the remote's timestamp
pub fn last_write_wins(local: DateTime<Utc>, remote: Option<DateTime<Utc>>) -> Winner {
    match remote {
        Some(remote) if remote >= local => Winner::Remote,
        _ => Winner::Local,
    }
}

/// Decide the outcome of `resolution` for `conflict`
///
/// `local_updated_at` is the time of the last local mutation of the entity.
pub fn reconcile(
    resolution: ConflictResolution,
    conflict: &SyncConflict,
    local_updated_at: DateTime<Utc>,
) -> Result<ReconciliationOutcome, SyncError> {
    match resolution {
        ConflictResolution::Local => Ok(keep_local(conflict)),
        ConflictResolution::Remote => adopt_remote(conflict),
        ConflictResolution::Merge => {
            let remote_at = conflict.remote_record.as_ref().map(|r| r.updated_at);
            match last_write_wins(local_updated_at, remote_at) {
                Winner::Local => Ok(keep_local(conflict)),
                Winner::Remote => adopt_remote(conflict),
            }
        }
    }
}

fn keep_local(conflict: &SyncConflict) -> ReconciliationOutcome {
    ReconciliationOutcome::KeepLocal {
        assumed_version: conflict.remote_version.clone(),
    }
}

fn adopt_remote(conflict: &SyncConflict) -> Result<ReconciliationOutcome, SyncError> {
    if let Some(record) = &conflict.remote_record {
        return Ok(ReconciliationOutcome::AdoptRemote {
            record: Some(record.clone()),
        });
    }
    if conflict.remote_deleted {
        return Ok(ReconciliationOutcome::AdoptRemote { record: None });
    }
    Err(SyncError::ResolutionUnavailable {
        entity_id: conflict.entity_id.clone(),
        reason: "the remote did not send its record".to_string(),
    })
}
