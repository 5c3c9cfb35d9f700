//! FinTrack Sync - Offline-First Sync Layer
//!
//! The persistence and synchronization layer of the FinTrack dashboard. It
//! keeps financial records (transactions, categories, chama group
//! contributions) in a durable local store, queues every local mutation, and
//! replays the queue against the remote apply endpoint whenever the device
//! is online.
//!
//! # Overview
//!
//! - Local mutations never wait on the network: a write updates the local
//!   store and queues an operation in one atomic step
//! - Queued operations are applied in FIFO order per entity, with
//!   exponential backoff on transient failures
//! - Version conflicts are surfaced and resolved by keeping the local copy,
//!   adopting the remote copy, or last write wins
//! - A status snapshot (`synced`, `syncing`, `offline`, `sync-error`) is
//!   published to UI subscribers on every change
//!
//! # Module Structure
//!
//! - **`shared`** - Domain types, errors, configuration and the clock
//! - **`local_db`** - SQLite store and an in-memory store behind the same traits
//! - **`offline`** - Operation queue, retry policy and reconciliation rules
//! - **`sync`** - Drain engine, connectivity monitor, status and the
//!   `SyncService` facade
//! - **`remote_client`** - Wire contract with the remote apply endpoint
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fintrack_sync::local_db::LocalDatabase;
//! use fintrack_sync::remote_client::HttpRemote;
//! use fintrack_sync::shared::config::SyncConfig;
//! use fintrack_sync::sync::SyncService;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::load(None)?;
//! let db = LocalDatabase::open(&config.database_path).await?;
//! let remote = HttpRemote::new("https://api.example.com", config.request_timeout)?;
//!
//! let service = SyncService::new(Arc::new(db), Arc::new(remote), config).await?;
//! service.start().await?;
//! println!("{}", service.status().await.sync_status);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! - `StoreError` for the durable store; an unavailable store is reported,
//!   never silently replaced by memory
//! - `SyncError` for everything returned by the queue and the service
//! - `RemoteError` classifies remote failures as transient or permanent

/// Shared types and data structures
pub mod shared;

/// Durable local storage
pub mod local_db;

/// Offline operation queue
pub mod offline;

/// Synchronization engine and service
pub mod sync;

/// Remote apply endpoint client
pub mod remote_client;
