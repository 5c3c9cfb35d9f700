//! Shared Module
//!
//! Domain records, queue entries, errors and configuration used across the
//! store, the queue and the sync engine. All record and operation types are
//! serializable for storage and for the remote wire format.

/// Financial entity records
pub mod entity;

/// Queue entries and conflicts
pub mod operation;

/// Shared error types
pub mod error;

/// Sync configuration
pub mod config;

/// Time source
pub mod clock;

/// Re-export commonly used types for convenience
pub use clock::{Clock, SystemClock};
pub use config::{ConfigError, SyncConfig, SyncConfigBuilder};
pub use entity::{EntityBody, EntityRecord, EntityType};
pub use error::{SharedError, SyncError};
pub use operation::{ConflictResolution, OperationStatus, OperationType, QueuedOperation, SyncConflict};
