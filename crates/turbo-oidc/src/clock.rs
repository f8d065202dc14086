//! Wall-clock source
//!
//! Every time-based check reads "now" through [`Clock`] so tests can pin it.

use std::fmt;

/// Source of the current time in epoch seconds
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current Unix time in seconds
    fn now(&self) -> i64;
}

/// System clock backed by `chrono::Utc`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
