//! # Sync State Management
//!
//! Read-only status projection handed to UI collaborators.
//!
//! ## Features
//!
//! - **State Tracking**: queue counts, last sync time, connectivity
//! - **Status Derivation**: one `SyncStatus` computed by a fixed priority
//! - **Error Reporting**: last error text of a failed operation

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::offline::queue::QueueStats;
use crate::sync::network_monitor::{NetworkQuality, NetworkState};

/// Overall sync status shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    Syncing,
    Offline,
    SyncError,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Offline => "offline",
            SyncStatus::SyncError => "sync-error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status by priority: offline, then failures, then outstanding work
pub fn derive_status(is_online: bool, pass_active: bool, stats: &QueueStats) -> SyncStatus {
    if !is_online {
        SyncStatus::Offline
    } else if stats.failed > 0 {
        SyncStatus::SyncError
    } else if pass_active || stats.outstanding() > 0 {
        SyncStatus::Syncing
    } else {
        SyncStatus::Synced
    }
}

/// Snapshot returned by `status()` and pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_online: bool,
    pub sync_status: SyncStatus,
    /// Pending plus processing entries
    pub pending_operations: usize,
    pub failed_operations: usize,
    /// Conflicts waiting for a decision
    pub conflicts: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub network_quality: NetworkQuality,
    pub is_syncing: bool,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            is_online: true,
            sync_status: SyncStatus::Synced,
            pending_operations: 0,
            failed_operations: 0,
            conflicts: 0,
            last_sync_time: None,
            last_error: None,
            network_quality: NetworkQuality::Unknown,
            is_syncing: false,
        }
    }
}

impl StatusSnapshot {
    pub fn build(
        network: &NetworkState,
        pass_active: bool,
        stats: &QueueStats,
        last_sync_time: Option<DateTime<Utc>>,
        last_error: Option<String>,
    ) -> Self {
        Self {
            is_online: network.is_online(),
            sync_status: derive_status(network.is_online(), pass_active, stats),
            pending_operations: stats.outstanding(),
            failed_operations: stats.failed,
            conflicts: stats.conflicted,
            last_sync_time,
            last_error,
            network_quality: network.quality,
            is_syncing: pass_active,
        }
    }
}
