//! Time source for queue scheduling.
//!
//! Timestamps are kept at microsecond resolution, the precision the local
//! database stores.

use chrono::{DateTime, SubsecRound, Utc};
use std::fmt::Debug;

/// Source of the current time
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }
}
