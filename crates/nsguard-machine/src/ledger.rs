//! Failover ledger: when failovers happened, for the cooldown and
//! daily-ceiling gates.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Ordered timestamps of accepted FAILING_OVER entries.
///
/// The entry window is trimmed lazily to the trailing 24 hours; the most
/// recent failover instant is kept separately so the cooldown gate still
/// works with cooldowns longer than the window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailoverLedger {
    entries: Vec<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
}

impl FailoverLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted failover at `at` and trim the window.
    pub fn record(&mut self, at: DateTime<Utc>) {
        self.entries.push(at);
        self.last = Some(at);
        self.trim(at);
    }

    /// Instant of the most recent failover, if any.
    pub fn last_failover_at(&self) -> Option<DateTime<Utc>> {
        self.last
    }

    /// Accepted failovers on the given UTC calendar day.
    pub fn count_on_day(&self, day: NaiveDate) -> u32 {
        self.entries
            .iter()
            .filter(|at| at.date_naive() == day)
            .count() as u32
    }

    /// Entries currently inside the 24-hour window, oldest first.
    pub fn entries(&self) -> &[DateTime<Utc>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn trim(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(24);
        self.entries.retain(|at| *at >= cutoff);
    }
}
