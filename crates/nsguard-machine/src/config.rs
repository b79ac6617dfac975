//! Per-instance machine configuration.
//!
//! Two named profiles cover the two operating regimes: `production` runs on
//! the 0–100 score scale with conservative timers; `simplified` runs on the
//! [0,1] scale with short timers and a higher daily ceiling. A machine is
//! built with exactly one profile; scales are never mixed within an
//! instance.

use crate::error::ValidationError;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// The score scale a machine instance operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreScale {
    /// Scores in [0,100].
    Percent,
    /// Scores in [0,1].
    Unit,
}

impl ScoreScale {
    pub fn max(&self) -> f64 {
        match self {
            Self::Percent => 100.0,
            Self::Unit => 1.0,
        }
    }

    pub fn validate(&self, score: f64) -> Result<(), ValidationError> {
        if !score.is_finite() || score < 0.0 || score > self.max() {
            return Err(ValidationError::ScoreOutOfRange {
                score,
                max: self.max(),
            });
        }
        Ok(())
    }

    /// Translate a composite score from the scorer's native 0–100 scale
    /// into this scale.
    pub fn from_percent(&self, composite: f64) -> f64 {
        match self {
            Self::Percent => composite,
            Self::Unit => composite / 100.0,
        }
    }
}

/// Score thresholds driving `evaluate`, expressed on the instance's scale.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    /// Below this the primary is considered degraded; also aborts an
    /// in-progress recovery.
    pub degrade_below: f64,
    /// At or above this the primary counts as recovered.
    pub recover_at: f64,
    /// Below this, while degraded, a failover is justified.
    pub failover_below: f64,
}

#[derive(Debug, Clone)]
pub struct FailoverConfig {
    pub scale: ScoreScale,
    pub thresholds: Thresholds,
    /// Minimum dwell time before any state may be exited. Equality passes.
    pub min_time_in_state: Duration,
    /// Minimum separation between two failovers.
    pub failover_cooldown: Duration,
    /// Maximum accepted FAILING_OVER entries per UTC calendar day.
    pub max_daily_failovers: u32,
    /// Whether entering FAILING_OVER requires the single-use authorization
    /// flag.
    pub require_manual_auth: bool,
}

impl FailoverConfig {
    pub fn production() -> Self {
        Self {
            scale: ScoreScale::Percent,
            thresholds: Thresholds {
                degrade_below: 40.0,
                recover_at: 60.0,
                failover_below: 20.0,
            },
            min_time_in_state: Duration::minutes(5),
            failover_cooldown: Duration::hours(1),
            max_daily_failovers: 1,
            require_manual_auth: false,
        }
    }

    pub fn simplified() -> Self {
        Self {
            scale: ScoreScale::Unit,
            thresholds: Thresholds {
                degrade_below: 0.5,
                recover_at: 0.5,
                failover_below: 0.2,
            },
            min_time_in_state: Duration::seconds(60),
            failover_cooldown: Duration::minutes(5),
            max_daily_failovers: 3,
            require_manual_auth: false,
        }
    }

    pub fn with_min_time_in_state(mut self, d: Duration) -> Self {
        self.min_time_in_state = d;
        self
    }

    pub fn with_cooldown(mut self, d: Duration) -> Self {
        self.failover_cooldown = d;
        self
    }

    pub fn with_max_daily_failovers(mut self, max: u32) -> Self {
        self.max_daily_failovers = max;
        self
    }

    pub fn with_manual_auth(mut self, required: bool) -> Self {
        self.require_manual_auth = required;
        self
    }
}
