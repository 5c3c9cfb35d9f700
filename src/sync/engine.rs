//! # Drain Engine
//!
//! Runs drain passes: sends due queue entries to the remote in FIFO order
//! and records each outcome durably before moving on.
//!
//! ## Pass Rules
//!
//! - One pass at a time; a trigger during a pass is a no-op
//! - No pass while offline, and no new attempts once connectivity drops
//! - An entity with an entry in flight, in conflict, or waiting out a
//!   backoff holds back its later entries
//! - Only a store failure aborts a pass; remote failures are per entry
//!
//! The engine also owns the status channel, since a pass is what changes
//! the status most often.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

use crate::local_db::store::LAST_SYNC_TIME_KEY;
use crate::offline::queue::{OperationQueue, QueueStats};
use crate::offline::reconciliation::ReconciliationOutcome;
use crate::remote_client::{ApplyRequest, ApplyResponse, RemoteApply, RemoteError};
use crate::shared::error::SyncError;
use crate::shared::operation::{ConflictResolution, OperationStatus, QueuedOperation};
use crate::sync::conflict_resolver::{build_conflict, ConflictResolver, RemoteConflict};
use crate::sync::metrics::{PassReport, SyncMetrics};
use crate::sync::network_monitor::ConnectivityMonitor;
use crate::sync::sync_state::{StatusSnapshot, SyncStatus};

/// Why a requested pass did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
}

/// Result of a drain request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    Skipped(SkipReason),
}

impl PassOutcome {
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            PassOutcome::Completed(report) => Some(report),
            PassOutcome::Skipped(_) => None,
        }
    }
}

/// What happened to a single entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Applied,
    Retried,
    Failed,
    Conflicted,
}

/// Holds the single-flight flag for the duration of a pass
struct PassGuard<'a>(&'a AtomicBool);

impl<'a> PassGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(flag))
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Marks an entity as having an entry in flight
struct EntityGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    entity_id: String,
}

impl<'a> EntityGuard<'a> {
    fn acquire(in_flight: &'a Mutex<HashSet<String>>, entity_id: &str) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.insert(entity_id.to_string()).then(|| EntityGuard {
            in_flight,
            entity_id: entity_id.to_string(),
        })
    }
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.remove(&self.entity_id);
    }
}

/// Drain pass runner
#[derive(Debug)]
pub struct SyncEngine {
    queue: Arc<OperationQueue>,
    remote: Arc<dyn RemoteApply>,
    monitor: Arc<ConnectivityMonitor>,
    resolver: ConflictResolver,
    request_timeout: Duration,
    completed_retention: Duration,
    draining: AtomicBool,
    in_flight: Mutex<HashSet<String>>,
    metrics: RwLock<SyncMetrics>,
    last_sync_time: RwLock<Option<DateTime<Utc>>>,
    status: watch::Sender<StatusSnapshot>,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<OperationQueue>,
        remote: Arc<dyn RemoteApply>,
        monitor: Arc<ConnectivityMonitor>,
        conflict_policy: Option<ConflictResolution>,
        request_timeout: Duration,
        completed_retention: Duration,
    ) -> Self {
        let (status, _) = watch::channel(StatusSnapshot::default());
        Self {
            resolver: ConflictResolver::new(Arc::clone(&queue), conflict_policy),
            queue,
            remote,
            monitor,
            request_timeout,
            completed_retention,
            draining: AtomicBool::new(false),
            in_flight: Mutex::new(HashSet::new()),
            metrics: RwLock::new(SyncMetrics::new()),
            last_sync_time: RwLock::new(None),
            status,
        }
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub async fn metrics(&self) -> SyncMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_time.read().await
    }

    /// Restore the last sync time persisted by an earlier session
    pub async fn load_last_sync_time(&self) -> Result<Option<DateTime<Utc>>, SyncError> {
        let stored = self.queue.store().metadata(LAST_SYNC_TIME_KEY).await?;
        let parsed = stored.and_then(|value| match DateTime::parse_from_rfc3339(&value) {
            Ok(time) => Some(time.with_timezone(&Utc)),
            Err(e) => {
                tracing::warn!(value, error = %e, "Ignoring unreadable last sync time");
                None
            }
        });
        *self.last_sync_time.write().await = parsed;
        Ok(parsed)
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Last published snapshot
    pub fn current_status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Recompute the status and notify subscribers if it changed
    pub async fn publish_status(&self) -> StatusSnapshot {
        let network = self.monitor.current();
        let pass_active = self.is_draining();

        let snapshot = match self.queue.operations().await {
            Ok(operations) => {
                let stats = QueueStats::from_operations(&operations);
                let last_error = latest_failure(&operations);
                StatusSnapshot::build(&network, pass_active, &stats, self.last_sync_time().await, last_error)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Status refresh could not read the queue");
                let previous = self.current_status();
                StatusSnapshot {
                    is_online: network.is_online(),
                    sync_status: if network.is_online() {
                        previous.sync_status
                    } else {
                        SyncStatus::Offline
                    },
                    network_quality: network.quality,
                    is_syncing: pass_active,
                    last_error: Some(e.to_string()),
                    ..previous
                }
            }
        };

        self.status.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot.clone();
                true
            }
        });
        snapshot
    }

    /// Run one drain pass
    pub async fn drain(&self) -> Result<PassOutcome, SyncError> {
        if !self.monitor.is_online() {
            tracing::debug!("Skipping drain pass while offline");
            return Ok(PassOutcome::Skipped(SkipReason::Offline));
        }
        let Some(pass) = PassGuard::acquire(&self.draining) else {
            tracing::debug!("Drain pass already running");
            return Ok(PassOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        tracing::info!("Drain pass started");
        self.publish_status().await;
        let started = Instant::now();

        let result = self.run_pass().await;
        let elapsed = started.elapsed();

        match &result {
            Ok(report) => {
                self.metrics.write().await.record_pass(report, elapsed);
                tracing::info!(
                    attempted = report.attempted,
                    applied = report.applied,
                    retried = report.retried,
                    failed = report.failed,
                    conflicted = report.conflicted,
                    deferred = report.deferred,
                    ?elapsed,
                    "Drain pass finished"
                );
            }
            Err(e) => {
                self.metrics.write().await.record_aborted(elapsed);
                if e.is_storage() {
                    tracing::error!(error = %e, "Drain pass aborted, local store unavailable");
                } else {
                    tracing::error!(error = %e, "Drain pass aborted");
                }
            }
        }

        drop(pass);
        self.publish_status().await;
        result.map(PassOutcome::Completed)
    }

    async fn run_pass(&self) -> Result<PassReport, SyncError> {
        let operations = self.queue.operations().await?;

        // Entities with an entry in flight or in conflict hold back everything after it
        let mut blocked: HashSet<String> = operations
            .iter()
            .filter(|op| matches!(op.status, OperationStatus::Processing | OperationStatus::Conflicted))
            .map(|op| op.entity_id.clone())
            .collect();

        let mut report = PassReport::default();

        for op in operations.into_iter().filter(|op| op.status == OperationStatus::Pending) {
            if !self.monitor.is_online() || blocked.contains(&op.entity_id) {
                report.deferred += 1;
                continue;
            }
            if !op.is_due(self.queue.now()) {
                blocked.insert(op.entity_id.clone());
                report.deferred += 1;
                continue;
            }
            let Some(_entity) = EntityGuard::acquire(&self.in_flight, &op.entity_id) else {
                blocked.insert(op.entity_id.clone());
                report.deferred += 1;
                continue;
            };

            report.attempted += 1;
            let entity_id = op.entity_id.clone();
            match self.process(op).await? {
                EntryOutcome::Applied => report.applied += 1,
                EntryOutcome::Failed => report.failed += 1,
                EntryOutcome::Retried => {
                    report.retried += 1;
                    blocked.insert(entity_id);
                }
                EntryOutcome::Conflicted => {
                    report.conflicted += 1;
                    blocked.insert(entity_id);
                }
            }
            self.publish_status().await;
        }

        let now = self.queue.now();
        self.record_sync_time(now).await?;

        if let Some(cutoff) = chrono::Duration::from_std(self.completed_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        {
            self.queue.purge_completed(cutoff).await?;
        }

        Ok(report)
    }

    async fn process(&self, op: QueuedOperation) -> Result<EntryOutcome, SyncError> {
        // Reload: an earlier entry in this pass may have rebased this one
        let op = self.queue.mark_processing(op.id).await?;
        let request = ApplyRequest::from_operation(&op);

        tracing::debug!(
            operation_id = %op.id,
            entity_id = %op.entity_id,
            operation_type = %op.operation_type,
            "Applying operation"
        );

        let result = match tokio::time::timeout(self.request_timeout, self.remote.apply(&request)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Transient(format!(
                "request timed out after {}ms",
                self.request_timeout.as_millis()
            ))),
        };

        match result {
            Ok(ApplyResponse::Ok { server_version }) => {
                self.queue.mark_completed(op.id, &server_version).await?;
                Ok(EntryOutcome::Applied)
            }
            Ok(ApplyResponse::Conflict {
                server_version,
                record,
                updated_at,
                deleted,
            }) => {
                tracing::warn!(
                    operation_id = %op.id,
                    entity_id = %op.entity_id,
                    remote_version = %server_version,
                    "Version conflict"
                );
                let local_record = self.queue.store().get(&op.entity_id).await?;
                let remote = RemoteConflict {
                    server_version,
                    record,
                    updated_at,
                    deleted,
                };
                let conflict = build_conflict(&op, local_record, remote, self.queue.now());
                self.queue.mark_conflicted(op.id, conflict).await?;

                if self.resolver.auto_resolve(&op.entity_id).await?.is_some() {
                    self.metrics.write().await.record_resolution();
                }
                Ok(EntryOutcome::Conflicted)
            }
            Err(error) if error.is_transient() => {
                let op = self.queue.mark_pending_with_backoff(op.id, error.message()).await?;
                if op.status == OperationStatus::Failed {
                    Ok(EntryOutcome::Failed)
                } else {
                    Ok(EntryOutcome::Retried)
                }
            }
            Err(error) => {
                self.queue.mark_failed(op.id, error.message()).await?;
                Ok(EntryOutcome::Failed)
            }
        }
    }

    async fn record_sync_time(&self, now: DateTime<Utc>) -> Result<(), SyncError> {
        self.queue
            .store()
            .set_metadata(LAST_SYNC_TIME_KEY, &now.to_rfc3339())
            .await?;
        *self.last_sync_time.write().await = Some(now);
        Ok(())
    }

    /// Resolve a pending conflict on request
    pub async fn resolve_conflict(
        &self,
        entity_id: &str,
        resolution: ConflictResolution,
    ) -> Result<ReconciliationOutcome, SyncError> {
        let outcome = self.resolver.resolve(entity_id, resolution).await?;
        self.metrics.write().await.record_resolution();
        self.publish_status().await;
        Ok(outcome)
    }
}

/// Error text of the most recently attempted failed entry
fn latest_failure(operations: &[QueuedOperation]) -> Option<String> {
    operations
        .iter()
        .filter(|op| op.status == OperationStatus::Failed)
        .max_by_key(|op| op.last_attempt_at)
        .and_then(|op| op.last_error.clone())
}
