//! Remote doubles for integration tests
//!
//! `ScriptedRemote` replays a fixed sequence of replies and records every
//! request it receives. Once the script runs out it acknowledges each
//! request with a fresh version (`v1`, `v2`, ...).

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fintrack_sync::remote_client::{ApplyRequest, ApplyResponse, RemoteApply, RemoteError};

/// One scripted step
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(Result<ApplyResponse, RemoteError>),
    /// Acknowledge with the next generated version
    Ack,
    /// Sleep before acknowledging; longer than the request timeout means a timeout
    Stall(Duration),
}

#[derive(Debug, Default)]
pub struct ScriptedRemote {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ApplyRequest>>,
    versions: AtomicUsize,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, reply: Result<ApplyResponse, RemoteError>) -> &Self {
        self.script.lock().unwrap().push_back(Scripted::Reply(reply));
        self
    }

    pub fn ack(&self) -> &Self {
        self.script.lock().unwrap().push_back(Scripted::Ack);
        self
    }

    pub fn transient(&self, message: &str) -> &Self {
        self.reply(Err(RemoteError::Transient(message.to_string())))
    }

    pub fn permanent(&self, message: &str) -> &Self {
        self.reply(Err(RemoteError::Permanent(message.to_string())))
    }

    pub fn stall(&self, duration: Duration) -> &Self {
        self.script.lock().unwrap().push_back(Scripted::Stall(duration));
        self
    }

    /// Requests received so far, in arrival order
    pub fn requests(&self) -> Vec<ApplyRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_version(&self) -> ApplyResponse {
        let n = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        ApplyResponse::ok(format!("v{}", n))
    }
}

#[async_trait]
impl RemoteApply for ScriptedRemote {
    async fn apply(&self, request: &ApplyRequest) -> Result<ApplyResponse, RemoteError> {
        self.requests.lock().unwrap().push(request.clone());
        let step = self.script.lock().unwrap().pop_front();

        match step {
            Some(Scripted::Reply(reply)) => reply,
            Some(Scripted::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(self.next_version())
            }
            Some(Scripted::Ack) | None => Ok(self.next_version()),
        }
    }
}
