//! # Synchronization Module
//!
//! Offline-first synchronization between the local store and the remote
//! apply endpoint.
//!
//! ## Architecture
//!
//! - **Engine** (`engine.rs`): single-flight drain passes over the queue
//! - **Conflict Resolver** (`conflict_resolver.rs`): conflict detection and
//!   local/remote/merge resolution
//! - **Network Monitor** (`network_monitor.rs`): connectivity state and
//!   reachability probes
//! - **Scheduler** (`scheduler.rs`): periodic drain trigger
//! - **Sync State** (`sync_state.rs`): status projection for the UI
//! - **Metrics** (`metrics.rs`): pass and outcome counters
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fintrack_sync::shared::config::SyncConfig;
//! use fintrack_sync::shared::entity::EntityType;
//! use fintrack_sync::shared::operation::OperationType;
//! use fintrack_sync::sync::SyncService;
//!
//! # async fn run() -> Result<(), fintrack_sync::shared::error::SyncError> {
//! let config = SyncConfig::builder().server_url("https://api.example.com").build()?;
//! let service = SyncService::open(config).await?;
//! service.start().await?;
//!
//! let payload = serde_json::json!({
//!     "role": "personal", "kind": "income", "amount": 250000, "currency": "KES",
//!     "category_id": null, "description": "salary", "occurred_on": "2026-10-16"
//! });
//! service.enqueue_operation(OperationType::Create, EntityType::Transaction, "t1", payload).await?;
//!
//! let _subscription = service.on_status_change(|status| println!("{}", status.sync_status));
//! # Ok(())
//! # }
//! ```

pub mod conflict_resolver;
pub mod engine;
pub mod metrics;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::local_db::store::SyncStore;
use crate::local_db::LocalDatabase;
use crate::offline::queue::OperationQueue;
use crate::offline::reconciliation::ReconciliationOutcome;
use crate::offline::retry::RetryPolicy;
use crate::remote_client::{ApplyRequest, FnRemote, HttpRemote, RemoteApply, RemoteError};
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::config::{ConfigError, SyncConfig};
use crate::shared::entity::EntityType;
use crate::shared::error::SyncError;
use crate::shared::operation::{ConflictResolution, OperationType, QueuedOperation, SyncConflict};

use self::engine::{PassOutcome, SyncEngine};
use self::metrics::SyncMetrics;
use self::network_monitor::{ConnectivityMonitor, NetworkState};
use self::scheduler::SyncScheduler;
use self::sync_state::StatusSnapshot;

/// Handle for a status callback; dropping it unregisters the callback
#[derive(Debug)]
pub struct StatusSubscription {
    task: JoinHandle<()>,
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Main synchronization service
#[derive(Debug)]
pub struct SyncService {
    /// Service configuration
    config: SyncConfig,
    /// Drain engine, shared with background tasks
    engine: Arc<SyncEngine>,
    /// Connectivity state
    monitor: Arc<ConnectivityMonitor>,
    /// Periodic trigger
    scheduler: Arc<SyncScheduler>,
    /// Background tasks started by `start`
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncService {
    /// Open the SQLite store and HTTP remote named by `config`
    pub async fn open(config: SyncConfig) -> Result<Self, SyncError> {
        let server_url = config.server_url.clone().ok_or(ConfigError::InvalidValue {
            key: "server_url",
            message: "required to reach the remote".to_string(),
        })?;
        let remote = HttpRemote::new(&server_url, config.request_timeout).map_err(|e| {
            ConfigError::InvalidValue {
                key: "server_url",
                message: e.to_string(),
            }
        })?;
        let db = LocalDatabase::open(&config.database_path).await?;

        Self::new(Arc::new(db), Arc::new(remote), config).await
    }

    /// Open the SQLite store named by `config` without a remote
    ///
    /// For inspecting and editing the local queue when no server is
    /// configured. Connectivity is reported offline, so drain passes are
    /// skipped and no entry is attempted.
    pub async fn open_local(config: SyncConfig) -> Result<Self, SyncError> {
        let remote = FnRemote::new(|_request: ApplyRequest| async move {
            Err(RemoteError::Transient("no server_url configured".to_string()))
        });
        let db = LocalDatabase::open(&config.database_path).await?;

        let service = Self::new(Arc::new(db), Arc::new(remote), config).await?;
        service.monitor.set_online(false);
        service.engine.publish_status().await;
        Ok(service)
    }

    /// Create a service over an existing store and remote
    pub async fn new(
        store: Arc<dyn SyncStore>,
        remote: Arc<dyn RemoteApply>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        Self::with_clock(store, remote, config, Arc::new(SystemClock)).await
    }

    /// Create a service with an explicit time source
    ///
    /// Entries left `processing` by an interrupted session are returned to
    /// `pending` before anything else runs.
    pub async fn with_clock(
        store: Arc<dyn SyncStore>,
        remote: Arc<dyn RemoteApply>,
        config: SyncConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        let queue = Arc::new(OperationQueue::new(store, RetryPolicy::from_config(&config), clock));
        queue.recover().await?;

        let monitor = Arc::new(ConnectivityMonitor::from_config(&config));
        let engine = Arc::new(SyncEngine::new(
            queue,
            remote,
            Arc::clone(&monitor),
            config.conflict_policy,
            config.request_timeout,
            config.completed_retention,
        ));
        engine.load_last_sync_time().await?;
        engine.publish_status().await;

        Ok(Self {
            scheduler: Arc::new(SyncScheduler::new(config.sync_interval)),
            config,
            engine,
            monitor,
            background_tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        self.engine.queue()
    }

    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// Start the connectivity listener and the periodic trigger
    pub async fn start(&self) -> Result<(), SyncError> {
        let mut tasks = self.tasks();
        if !tasks.is_empty() {
            return Err(SyncError::AlreadyRunning);
        }

        let engine = Arc::clone(&self.engine);
        let monitor = Arc::clone(&self.monitor);
        let scheduler = Arc::clone(&self.scheduler);
        tasks.push(tokio::spawn(async move {
            Self::connectivity_loop(engine, monitor, scheduler).await;
        }));

        if self.config.auto_sync || self.config.probe_url.is_some() {
            let engine = Arc::clone(&self.engine);
            let monitor = Arc::clone(&self.monitor);
            let scheduler = Arc::clone(&self.scheduler);
            let config = self.config.clone();
            tasks.push(tokio::spawn(async move {
                Self::background_sync_loop(engine, monitor, scheduler, config).await;
            }));
        }

        tracing::info!(interval = ?self.config.sync_interval, "Sync service started");
        Ok(())
    }

    /// Stop all background tasks
    pub async fn stop(&self) {
        let handles: Vec<_> = self.tasks().drain(..).collect();
        if !handles.is_empty() {
            for handle in handles {
                handle.abort();
            }
            tracing::info!("Sync service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.tasks().is_empty()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.background_tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record a local mutation and queue it for the remote
    ///
    /// Succeeds whether or not the device is online; fails only on invalid
    /// input or when the local store cannot be written.
    pub async fn enqueue_operation(
        &self,
        operation_type: OperationType,
        entity_type: EntityType,
        entity_id: &str,
        payload: serde_json::Value,
    ) -> Result<Uuid, SyncError> {
        let id = self
            .engine
            .queue()
            .enqueue(operation_type, entity_type, entity_id, payload)
            .await?;
        self.engine.publish_status().await;

        if self.is_running() && self.monitor.is_online() {
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move {
                Self::drain_logged(&engine).await;
            });
        }
        Ok(id)
    }

    /// Current status, recomputed from the store
    pub async fn status(&self) -> StatusSnapshot {
        self.engine.publish_status().await
    }

    /// Run a drain pass now
    ///
    /// A no-op while offline or while another pass is running.
    pub async fn trigger_manual_sync(&self) -> Result<PassOutcome, SyncError> {
        self.engine.drain().await
    }

    /// Apply a resolution to the pending conflict of `entity_id`
    pub async fn resolve_conflict(
        &self,
        entity_id: &str,
        resolution: ConflictResolution,
    ) -> Result<ReconciliationOutcome, SyncError> {
        self.engine.resolve_conflict(entity_id, resolution).await
    }

    pub async fn conflicts(&self) -> Result<Vec<SyncConflict>, SyncError> {
        self.engine.resolver().conflicts().await
    }

    /// All queue entries in FIFO order
    pub async fn operations(&self) -> Result<Vec<QueuedOperation>, SyncError> {
        self.engine.queue().operations().await
    }

    /// Give a failed entry a fresh retry budget
    pub async fn retry_failed(&self, id: Uuid) -> Result<QueuedOperation, SyncError> {
        let op = self.engine.queue().retry_failed(id).await?;
        self.engine.publish_status().await;
        Ok(op)
    }

    /// Drop a failed or conflicted entry without applying it
    pub async fn discard_operation(&self, id: Uuid) -> Result<QueuedOperation, SyncError> {
        let op = self.engine.queue().discard(id).await?;
        self.engine.publish_status().await;
        Ok(op)
    }

    pub async fn metrics(&self) -> SyncMetrics {
        self.engine.metrics().await
    }

    pub fn network(&self) -> NetworkState {
        self.monitor.current()
    }

    /// Report connectivity from the host
    ///
    /// Going online triggers a drain pass. Returns whether the state changed.
    pub async fn set_online(&self, online: bool) -> bool {
        let changed = self.monitor.set_online(online);
        // With background tasks running, the connectivity listener reacts instead
        if changed && !self.is_running() {
            self.engine.publish_status().await;
            if online {
                Self::drain_logged(&self.engine).await;
            }
        }
        changed
    }

    /// Receiver that sees every published status
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.engine.subscribe()
    }

    /// Call `callback` with each new status until the handle is dropped
    pub fn on_status_change<F>(&self, callback: F) -> StatusSubscription
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        let mut receiver = self.engine.subscribe();
        let task = tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                let snapshot = receiver.borrow_and_update().clone();
                callback(&snapshot);
            }
        });
        StatusSubscription { task }
    }

    async fn drain_logged(engine: &SyncEngine) {
        if let Err(e) = engine.drain().await {
            tracing::error!("Sync cycle failed: {}", e);
        }
    }

    /// Reacts to connectivity changes
    async fn connectivity_loop(
        engine: Arc<SyncEngine>,
        monitor: Arc<ConnectivityMonitor>,
        scheduler: Arc<SyncScheduler>,
    ) {
        let mut receiver = monitor.subscribe();
        let mut was_online = receiver.borrow_and_update().is_online();

        while receiver.changed().await.is_ok() {
            let state = receiver.borrow_and_update().clone();
            scheduler.adjust_interval(&state).await;
            engine.publish_status().await;

            if state.is_online() && !was_online {
                tracing::info!("Connectivity restored");
                Self::drain_logged(&engine).await;
            } else if !state.is_online() && was_online {
                tracing::info!("Connectivity lost; queueing locally");
            }
            was_online = state.is_online();
        }
    }

    /// Periodic probe and drain trigger
    async fn background_sync_loop(
        engine: Arc<SyncEngine>,
        monitor: Arc<ConnectivityMonitor>,
        scheduler: Arc<SyncScheduler>,
        config: SyncConfig,
    ) {
        loop {
            tokio::time::sleep(scheduler.current_interval().await).await;

            if let Some(url) = &config.probe_url {
                monitor.probe(url).await;
            }

            if config.auto_sync && scheduler.should_sync(&monitor.current()).await {
                scheduler.record_sync().await;
                Self::drain_logged(&engine).await;
            }
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        for handle in self.tasks().drain(..) {
            handle.abort();
        }
    }
}
