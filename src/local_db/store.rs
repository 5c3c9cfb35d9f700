//! # Store Ports
//!
//! Storage interface the queue and the engine are written against. The
//! SQLite [`LocalDatabase`](crate::local_db::LocalDatabase) is the durable
//! implementation; [`MemoryStore`](crate::local_db::memory::MemoryStore)
//! backs tests and ephemeral sessions.
//!
//! Writes that must land together (a record and its queue entry, a
//! completion and the record it cleans) go through [`SyncStore::commit`],
//! which applies a batch atomically or not at all.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::shared::entity::{EntityFilter, EntityRecord};
use crate::shared::operation::{OperationStatus, QueuedOperation, SyncConflict};

/// Metadata key of the last completed drain pass
pub const LAST_SYNC_TIME_KEY: &str = "last_sync_time";

/// Durable store failures
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Store cannot be used at all (quota, I/O, closed)
    #[error("durable store unavailable: {message}")]
    Unavailable { message: String },

    /// A persisted row could not be decoded
    #[error("corrupt {table} row '{key}': {message}")]
    Corrupt {
        table: &'static str,
        key: String,
        message: String,
    },

    /// Backend-specific error
    #[error("database error: {message}")]
    Backend { message: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn corrupt(table: &'static str, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(e) => StoreError::unavailable(e.to_string()),
            sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
                StoreError::unavailable(err.to_string())
            }
            other => StoreError::backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Entity table (one row per record id)
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert or replace by id
    async fn put(&self, record: &EntityRecord) -> StoreResult<()>;

    /// `None` when the id is unknown
    async fn get(&self, id: &str) -> StoreResult<Option<EntityRecord>>;

    async fn get_all(&self, filter: &EntityFilter) -> StoreResult<Vec<EntityRecord>>;

    /// Idempotent
    async fn delete(&self, id: &str) -> StoreResult<()>;
}

/// Queue, conflict and metadata tables
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn operation(&self, id: Uuid) -> StoreResult<Option<QueuedOperation>>;

    /// Entries in enqueue order, optionally restricted to one status
    async fn operations(&self, status: Option<OperationStatus>) -> StoreResult<Vec<QueuedOperation>>;

    async fn conflicts(&self) -> StoreResult<Vec<SyncConflict>>;

    async fn conflict(&self, entity_id: &str) -> StoreResult<Option<SyncConflict>>;

    async fn metadata(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_metadata(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWrite {
    PutRecord(EntityRecord),
    DeleteRecord(String),
    /// Insert or replace a queue entry; new entries are appended
    SaveOperation(QueuedOperation),
    RemoveOperation(Uuid),
    SaveConflict(SyncConflict),
    RemoveConflict(String),
}

/// Full store used by the queue and the engine
#[async_trait]
pub trait SyncStore: EntityStore + QueueStore + std::fmt::Debug {
    /// Apply every write or none of them
    async fn commit(&self, writes: Vec<StoreWrite>) -> StoreResult<()>;
}
