//! Domain types shared across the nsguard failover controller.
//!
//! Defines the provider model, probe results, health scores, controller
//! states, transition records, and the registrar-side DNS binding mirror.

#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ─── Providers ───────────────────────────────────────────────────────────────

/// Stable identifier for an authoritative-DNS provider (e.g. "cloudflare").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(pub String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    Primary,
    Secondary,
}

impl std::fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A configured authoritative-DNS provider.
///
/// `endpoints` is the ordered list of the provider's nameserver hostnames.
/// These are both the probe targets and the NS set delegated to the zone
/// when this provider is made active at the registrar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub display_name: String,
    pub role: ProviderRole,
    pub endpoints: Vec<String>,
}

// ─── Probe results ───────────────────────────────────────────────────────────

/// One DNS probe against one provider endpoint. Created once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub provider: ProviderId,
    pub endpoint: String,
    pub query_domain: String,
    pub elapsed_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    /// Label identifying where the check ran (hostname or region).
    pub origin: String,
    pub checked_at: DateTime<Utc>,
}

// ─── Health scores ───────────────────────────────────────────────────────────

/// Composite health score for one provider over a window of probe results.
///
/// `composite` is always on the 0–100 scale; component scores are in [0,1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderScore {
    pub provider: ProviderId,
    pub composite: f64,
    pub success_rate: f64,
    pub latency_score: f64,
    pub consistency_score: f64,
    /// Number of probe results in the window this score was computed from.
    pub samples: usize,
}

// ─── Controller state ────────────────────────────────────────────────────────

/// States of the failover controller. Transitions are validated against a
/// fixed graph by the state machine; no state may transition to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerState {
    /// Primary provider serving; score above the degraded threshold.
    Healthy,
    /// Primary score below the degraded threshold; watching for recovery
    /// or further decline.
    Degraded,
    /// Registrar switch to the secondary in progress.
    FailingOver,
    /// Secondary provider is authoritative; primary being watched for
    /// recovery.
    FailedOver,
    /// Primary has recovered; dwelling before switching back.
    Recovering,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::FailingOver => "FAILING_OVER",
            Self::FailedOver => "FAILED_OVER",
            Self::Recovering => "RECOVERING",
        }
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ControllerState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HEALTHY" => Ok(Self::Healthy),
            "DEGRADED" => Ok(Self::Degraded),
            "FAILING_OVER" => Ok(Self::FailingOver),
            "FAILED_OVER" => Ok(Self::FailedOver),
            "RECOVERING" => Ok(Self::Recovering),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// Returned when a state name from an external boundary (CLI, config) does
/// not name a known controller state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownState(pub String);

impl std::fmt::Display for UnknownState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown state '{}'", self.0)
    }
}

impl std::error::Error for UnknownState {}

// ─── Transition records ──────────────────────────────────────────────────────

/// One accepted state transition. Appended to the transition log on every
/// commit; never mutated.
///
/// Records are chained: `record_hash` covers the record's canonical JSON
/// including `previous_hash`, so edits to the persisted log are detectable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub record_id: Uuid,
    pub from: ControllerState,
    pub to: ControllerState,
    pub at: DateTime<Utc>,
    pub reason: String,
    pub operator: Option<String>,
    /// Hex SHA-256 of the previous record (empty for the first record).
    pub previous_hash: String,
    /// Hex SHA-256 of this record's canonical JSON.
    pub record_hash: String,
}

// ─── DNS binding ─────────────────────────────────────────────────────────────

/// Local mirror of the registrar's view of a zone: which provider is active
/// and which NS set is delegated. Mutated only by the registrar driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsBinding {
    pub zone: String,
    pub active_provider: ProviderId,
    pub nameservers: Vec<String>,
    pub propagation_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_state_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&ControllerState::FailingOver).unwrap();
        assert_eq!(json, "\"FAILING_OVER\"");
        let back: ControllerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ControllerState::FailingOver);
    }

    #[test]
    fn controller_state_round_trips_through_from_str() {
        for state in [
            ControllerState::Healthy,
            ControllerState::Degraded,
            ControllerState::FailingOver,
            ControllerState::FailedOver,
            ControllerState::Recovering,
        ] {
            assert_eq!(state.as_str().parse::<ControllerState>().unwrap(), state);
        }
    }

    #[test]
    fn unknown_state_name_is_rejected() {
        let err = "FAILOVER_ACTIVE".parse::<ControllerState>().unwrap_err();
        assert_eq!(err, UnknownState("FAILOVER_ACTIVE".to_string()));
    }

    #[test]
    fn provider_id_display_matches_inner() {
        let id = ProviderId::new("route53");
        assert_eq!(id.to_string(), "route53");
        assert_eq!(id.as_str(), "route53");
    }
}
