//! Injectable clock.
//!
//! The controller reads time exclusively through this trait so that tests
//! can drive the safety gates (min-time, cooldown, daily ceiling) with a
//! virtual clock instead of sleeping.

use chrono::{DateTime, Utc};

/// Source of the current time. Must be monotonic within a process; the
/// state machine additionally rejects observed regressions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
