//! # Sync Metrics
//!
//! Counters for drain passes and per-operation outcomes.

use serde::Serialize;
use std::time::Duration;

/// Outcome counters, updated once per pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncMetrics {
    pub total_passes: u64,
    /// Passes cut short by a store failure
    pub aborted_passes: u64,
    pub operations_applied: u64,
    pub operations_retried: u64,
    pub operations_failed: u64,
    pub operations_conflicted: u64,
    pub conflicts_resolved: u64,
    pub last_pass_duration: Option<Duration>,
    pub average_pass_duration: Duration,
}

/// Tally of a single drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    /// Entries attempted against the remote
    pub attempted: usize,
    pub applied: usize,
    pub retried: usize,
    pub failed: usize,
    pub conflicted: usize,
    /// Pending entries left for a later pass
    pub deferred: usize,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(&mut self, report: &PassReport, duration: Duration) {
        self.total_passes += 1;
        self.operations_applied += report.applied as u64;
        self.operations_retried += report.retried as u64;
        self.operations_failed += report.failed as u64;
        self.operations_conflicted += report.conflicted as u64;
        self.record_duration(duration);
    }

    pub fn record_aborted(&mut self, duration: Duration) {
        self.total_passes += 1;
        self.aborted_passes += 1;
        self.record_duration(duration);
    }

    pub fn record_resolution(&mut self) {
        self.conflicts_resolved += 1;
    }

    fn record_duration(&mut self, duration: Duration) {
        self.last_pass_duration = Some(duration);

        // Update rolling average
        let passes = u32::try_from(self.total_passes).unwrap_or(u32::MAX);
        let total = self.average_pass_duration * passes.saturating_sub(1) + duration;
        self.average_pass_duration = total / passes.max(1);
    }

    /// Share of attempted operations that were applied
    pub fn success_rate(&self) -> f64 {
        let attempted = self.operations_applied
            + self.operations_retried
            + self.operations_failed
            + self.operations_conflicted;
        if attempted == 0 {
            0.0
        } else {
            self.operations_applied as f64 / attempted as f64
        }
    }
}
