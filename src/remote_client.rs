//! # Remote Apply Client
//!
//! Request/response contract between the sync engine and the backend, and
//! two implementations of it.
//!
//! ## Wire Format
//!
//! ```text
//! POST {server_url}/sync/operations
//! {"operationId": "..", "type": "update", "entityType": "transaction",
//!  "entityId": "t1", "payload": {..}, "assumedVersion": "v3"}
//!
//! 200 {"status": "ok", "serverVersion": "v4"}
//! 409 {"status": "conflict", "serverVersion": "v5", "record": {..}, "updatedAt": ".."}
//! ```
//!
//! ## Failure Classes
//!
//! - **Transient**: transport errors, timeouts, 408, 429 and 5xx
//! - **Permanent**: every other 4xx
//! - **Conflict**: 409 or a `conflict` body; not an error
//!
//! A 2xx body that does not parse is transient. A 409 body that does not
//! parse is permanent, since a conflict is never retried.
//!
//! `FnRemote` wraps a closure so tests script exact success, conflict and
//! failure sequences.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::shared::entity::EntityType;
use crate::shared::operation::{OperationType, QueuedOperation};

/// One queue entry as sent to the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyRequest {
    /// Lets the remote deduplicate retried deliveries
    pub operation_id: Uuid,
    #[serde(rename = "type")]
    pub operation_type: OperationType,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub payload: serde_json::Value,
    pub assumed_version: Option<String>,
}

impl ApplyRequest {
    pub fn from_operation(op: &QueuedOperation) -> Self {
        Self {
            operation_id: op.id,
            operation_type: op.operation_type,
            entity_type: op.entity_type,
            entity_id: op.entity_id.clone(),
            payload: op.payload.clone(),
            assumed_version: op.assumed_version.clone(),
        }
    }
}

/// Successful exchange with the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ApplyResponse {
    /// Applied; the entity is now at `server_version`
    Ok { server_version: String },
    /// The operation's assumed version is stale
    Conflict {
        server_version: String,
        /// Domain fields of the remote copy
        #[serde(default)]
        record: Option<serde_json::Value>,
        /// Last write of the remote copy
        #[serde(default)]
        updated_at: Option<DateTime<Utc>>,
        /// The remote has deleted the entity
        #[serde(default)]
        deleted: bool,
    },
}

impl ApplyResponse {
    pub fn ok(server_version: impl Into<String>) -> Self {
        ApplyResponse::Ok {
            server_version: server_version.into(),
        }
    }

    /// Conflict without a copy of the remote record
    pub fn conflict(server_version: impl Into<String>) -> Self {
        ApplyResponse::Conflict {
            server_version: server_version.into(),
            record: None,
            updated_at: None,
            deleted: false,
        }
    }
}

/// Failed exchange with the remote
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Worth retrying with backoff
    #[error("transient remote failure: {0}")]
    Transient(String),

    /// Will fail the same way again
    #[error("remote rejected operation: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }

    /// Failure text without the class prefix
    pub fn message(&self) -> &str {
        match self {
            RemoteError::Transient(message) | RemoteError::Permanent(message) => message,
        }
    }
}

/// Applies queue entries against the remote store
#[async_trait]
pub trait RemoteApply: Send + Sync + fmt::Debug {
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyResponse, RemoteError>;
}

/// HTTP JSON remote
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemote {
    /// `server_url` is the backend root; requests go to `/sync/operations`
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Permanent(format!("HTTP client setup failed: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/sync/operations", server_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteApply for HttpRemote {
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyResponse, RemoteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| RemoteError::Transient(e.to_string()))?;

        let status = response.status();
        tracing::debug!(operation_id = %request.operation_id, %status, "Remote responded");

        if status == reqwest::StatusCode::CONFLICT {
            return response.json::<ApplyResponse>().await.map_err(|e| {
                RemoteError::Permanent(format!("{}: conflict without a readable body: {}", status, e))
            });
        }
        if status.is_success() {
            return response
                .json::<ApplyResponse>()
                .await
                .map_err(|e| RemoteError::Transient(format!("{}: unreadable response body: {}", status, e)));
        }

        let body = response.text().await.unwrap_or_default();
        let message = if body.is_empty() {
            status.to_string()
        } else {
            format!("{}: {}", status, body)
        };

        if status.is_server_error()
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            Err(RemoteError::Transient(message))
        } else {
            Err(RemoteError::Permanent(message))
        }
    }
}

type ApplyFn = dyn Fn(ApplyRequest) -> BoxFuture<'static, Result<ApplyResponse, RemoteError>> + Send + Sync;

/// Remote backed by a closure
pub struct FnRemote {
    apply: Box<ApplyFn>,
}

impl FnRemote {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(ApplyRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApplyResponse, RemoteError>> + Send + 'static,
    {
        Self {
            apply: Box::new(move |request| f(request).boxed()),
        }
    }
}

impl fmt::Debug for FnRemote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRemote").finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteApply for FnRemote {
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyResponse, RemoteError> {
        (self.apply)(request.clone()).await
    }
}
