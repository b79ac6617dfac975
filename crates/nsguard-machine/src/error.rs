//! Error taxonomy of the state machine.
//!
//! Validation errors are programming or input mistakes and always fatal to
//! the call. Safety rejections are the machine refusing to thrash: soft,
//! expected, swallowed by `evaluate`. Registrar errors abort the current
//! transition with state preserved.

use chrono::{DateTime, Utc};
use nsguard_core::RegistrarError;
use nsguard_proto::{ControllerState, ProviderId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("score {score} outside [0,{max}]")]
    ScoreOutOfRange { score: f64, max: f64 },

    #[error("unknown provider '{0}'")]
    UnknownProvider(ProviderId),

    #[error("transition to current state {0} rejected")]
    SelfTransition(ControllerState),

    #[error("clock regression: {now} is not after state entry {entered_at}")]
    ClockRegression {
        now: DateTime<Utc>,
        entered_at: DateTime<Utc>,
    },

    #[error("provider configuration invalid: {0}")]
    ProviderConfig(String),
}

#[derive(Debug, Error)]
pub enum SafetyRejection {
    #[error("invalid transition {from} -> {to}")]
    InvalidTransition {
        from: ControllerState,
        to: ControllerState,
    },

    #[error("minimum time in state not met: {elapsed_secs}s of {required_secs}s")]
    MinTimeInState {
        elapsed_secs: i64,
        required_secs: i64,
    },

    #[error("failover cooldown active: {since_last_secs}s since last failover, {cooldown_secs}s required")]
    CooldownActive {
        since_last_secs: i64,
        cooldown_secs: i64,
    },

    #[error("daily failover ceiling reached: {count} of {max} today")]
    DailyCeilingReached { count: u32, max: u32 },

    #[error("manual authorization required for failover")]
    NotAuthorized,
}

#[derive(Debug, Error)]
pub enum FailoverError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Safety(#[from] SafetyRejection),

    #[error(transparent)]
    Registrar(#[from] RegistrarError),
}

impl FailoverError {
    /// True for the soft rejections `evaluate` swallows.
    pub fn is_safety_rejection(&self) -> bool {
        matches!(self, Self::Safety(_))
    }
}
