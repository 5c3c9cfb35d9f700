//! # Offline Operation Layer
//!
//! Durable queuing of local mutations while the remote is unreachable, plus
//! the retry and reconciliation rules applied when they are replayed.
//!
//! ## Architecture
//!
//! - **Operation Queue**: ordered log of pending mutations with status tracking
//! - **Retry Logic**: exponential backoff with a bounded retry budget
//! - **Reconciliation**: outcome of a conflict for each resolution mode
//!
//! ## Key Components
//!
//! - `queue.rs`: operation queue and status transitions
//! - `retry.rs`: backoff policy
//! - `reconciliation.rs`: conflict outcomes, last-write-wins merge

pub mod queue;
pub mod reconciliation;
pub mod retry;

// Re-export main types
pub use queue::{OperationQueue, QueueStats};
pub use reconciliation::{last_write_wins, reconcile, ReconciliationOutcome, Winner};
pub use retry::RetryPolicy;
