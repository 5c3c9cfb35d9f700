//! # Network Monitor
//!
//! Tracks connectivity and link quality, and publishes every change over a
//! `tokio::sync::watch` channel. The monitor never syncs by itself; the sync
//! service listens for the offline to online edge and starts a drain pass.
//!
//! ## Features
//!
//! - **Connectivity Detection**: driven by the host (`set_online`) or by an
//!   HTTP reachability probe (`probe`)
//! - **Network Quality**: probe latency above a threshold marks the link
//!   degraded; quality is advisory and never blocks a pass
//! - **Real-time Updates**: subscribers see each state change

use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::shared::config::SyncConfig;

/// Connectivity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Online,
    Offline,
}

/// Estimated link quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    Good,
    /// Reachable but slow
    Degraded,
    Unknown,
}

/// Snapshot published to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkState {
    pub status: NetworkStatus,
    pub quality: NetworkQuality,
    /// Round trip of the last successful probe
    pub latency_ms: Option<u64>,
}

impl NetworkState {
    pub fn online() -> Self {
        Self {
            status: NetworkStatus::Online,
            quality: NetworkQuality::Unknown,
            latency_ms: None,
        }
    }

    pub fn offline() -> Self {
        Self {
            status: NetworkStatus::Offline,
            quality: NetworkQuality::Unknown,
            latency_ms: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == NetworkStatus::Online
    }
}

/// Connectivity monitor
#[derive(Debug)]
pub struct ConnectivityMonitor {
    state: watch::Sender<NetworkState>,
    client: reqwest::Client,
    degraded_latency: Duration,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool, degraded_latency: Duration, probe_timeout: Duration) -> Self {
        let initial = if initially_online {
            NetworkState::online()
        } else {
            NetworkState::offline()
        };
        let (state, _) = watch::channel(initial);
        let client = reqwest::Client::builder()
            .timeout(probe_timeout)
            .build()
            .unwrap_or_default();

        Self {
            state,
            client,
            degraded_latency,
        }
    }

    /// Starts online; the first probe or host report corrects it
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(true, config.degraded_latency, config.request_timeout)
    }

    pub fn current(&self) -> NetworkState {
        self.state.borrow().clone()
    }

    pub fn is_online(&self) -> bool {
        self.state.borrow().is_online()
    }

    pub fn subscribe(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }

    /// Report connectivity from the host; returns whether it changed
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if state.is_online() == online {
                return false;
            }
            *state = if online {
                NetworkState::online()
            } else {
                NetworkState::offline()
            };
            true
        });

        if changed {
            tracing::info!(online, "Connectivity changed");
        }
        changed
    }

    /// Record a measured round trip and derive link quality
    pub fn record_latency(&self, latency: Duration) {
        let quality = if latency > self.degraded_latency {
            NetworkQuality::Degraded
        } else {
            NetworkQuality::Good
        };
        let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);

        self.state.send_if_modified(|state| {
            let next = NetworkState {
                status: NetworkStatus::Online,
                quality,
                latency_ms: Some(latency_ms),
            };
            if *state == next {
                return false;
            }
            if state.quality != quality {
                tracing::debug!(?quality, latency_ms, "Link quality changed");
            }
            *state = next;
            true
        });
    }

    /// Send a HEAD request to `url` and update the state from the outcome
    ///
    /// Any HTTP response counts as reachable; transport errors and timeouts
    /// count as offline.
    pub async fn probe(&self, url: &str) -> NetworkState {
        let started = Instant::now();
        match self.client.head(url).send().await {
            Ok(_) => {
                let was_offline = !self.is_online();
                self.record_latency(started.elapsed());
                if was_offline {
                    tracing::info!(url, "Remote reachable again");
                }
            }
            Err(e) => {
                tracing::debug!(url, error = %e, "Reachability probe failed");
                self.set_online(false);
            }
        }
        self.current()
    }
}
