//! # Sync Scheduler
//!
//! Periodic drain trigger for the background loop.
//!
//! ## Features
//!
//! - **Fixed Cadence**: one pass per interval while online
//! - **Bandwidth Awareness**: the interval doubles on a degraded link
//! - **Offline Awareness**: ticks are skipped while offline

use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::sync::network_monitor::{NetworkQuality, NetworkState};

/// Synchronization scheduler
#[derive(Debug)]
pub struct SyncScheduler {
    /// Interval on a good or unknown link
    base_interval: Duration,
    /// Interval currently in effect
    current_interval: RwLock<Duration>,
    /// Last time a scheduled pass was started
    last_sync: RwLock<Option<Instant>>,
}

impl SyncScheduler {
    pub fn new(base_interval: Duration) -> Self {
        Self {
            base_interval,
            current_interval: RwLock::new(base_interval),
            last_sync: RwLock::new(None),
        }
    }

    pub fn base_interval(&self) -> Duration {
        self.base_interval
    }

    pub async fn current_interval(&self) -> Duration {
        *self.current_interval.read().await
    }

    /// Interval to use for a link of `quality`
    pub fn interval_for(&self, quality: NetworkQuality) -> Duration {
        match quality {
            NetworkQuality::Degraded => self.base_interval * 2,
            NetworkQuality::Good | NetworkQuality::Unknown => self.base_interval,
        }
    }

    /// Adjust the interval to the current network state
    pub async fn adjust_interval(&self, network: &NetworkState) {
        let interval = self.interval_for(network.quality);
        let mut current = self.current_interval.write().await;
        if *current != interval {
            tracing::debug!(?interval, "Sync interval adjusted");
            *current = interval;
        }
    }

    /// Whether a scheduled pass is due
    pub async fn should_sync(&self, network: &NetworkState) -> bool {
        if !network.is_online() {
            return false;
        }

        let last_sync = *self.last_sync.read().await;
        let interval = self.current_interval().await;

        match last_sync {
            Some(time) => time.elapsed() >= interval,
            None => true,
        }
    }

    /// Record that a scheduled pass started
    pub async fn record_sync(&self) {
        *self.last_sync.write().await = Some(Instant::now());
    }
}
