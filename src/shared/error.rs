//! Shared Error Types
//!
//! This module defines the error types surfaced by the sync subsystem.
//!
//! # Error Categories
//!
//! - `SharedError` - serialization and validation failures on domain data
//! - `SyncError` - everything a caller of the sync service can observe
//!
//! Transient and conflict outcomes of a single remote call are never
//! surfaced as `SyncError`; they are recorded on the queue entry and show up
//! through the status surface. Only a failing durable store aborts a caller.
//!
//! # Usage
//!
//! ```rust
//! use fintrack_sync::shared::error::SharedError;
//!
//! let error = SharedError::validation("amount", "amount must be positive");
//! assert!(error.to_string().contains("amount"));
//! ```
use thiserror::Error;
use uuid::Uuid;

use crate::local_db::store::StoreError;
use crate::shared::config::ConfigError;

/// Errors raised while validating or (de)serializing domain data
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SharedError {
    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    SerializationError {
        /// Human-readable error message
        message: String,
    },

    /// Data validation error
    #[error("Validation error in field '{field}': {message}")]
    ValidationError {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },
}

impl SharedError {
    /// Create a new serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for SharedError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

/// Errors returned by the sync service to its callers
#[derive(Debug, Error)]
pub enum SyncError {
    /// The durable store could not be read or written
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Invalid input or undecodable data
    #[error(transparent)]
    Shared(#[from] SharedError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No queue entry with this id
    #[error("Operation not found: {0}")]
    OperationNotFound(Uuid),

    /// The queue entry is in a state that does not allow the request
    #[error("Operation {id} is {status}; {action} not allowed")]
    InvalidTransition {
        id: Uuid,
        status: String,
        action: &'static str,
    },

    /// No conflict is awaiting a decision for this entity
    #[error("No pending conflict for entity {0}")]
    ConflictNotFound(String),

    /// The requested resolution needs data the conflict does not carry
    #[error("Cannot resolve conflict for {entity_id}: {reason}")]
    ResolutionUnavailable { entity_id: String, reason: String },

    #[error("Sync service is already running")]
    AlreadyRunning,
}

impl SyncError {
    /// Whether the error means the durable store itself is unusable
    pub fn is_storage(&self) -> bool {
        matches!(self, SyncError::Storage(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Shared(err.into())
    }
}
