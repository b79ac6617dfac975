//! Failover state machine with safety gates.
//!
//! Consumes per-provider health scores, walks a fixed five-state transition
//! graph, and, only when every gate passes, executes the registrar-side
//! NS switch. The gates exist so that a transient blip can never escalate
//! into a thrashing controller:
//!
//! 1. minimum time in state (every transition; equality passes)
//! 2. failover cooldown (FAILING_OVER only)
//! 3. daily failover ceiling, per UTC calendar day (FAILING_OVER only)
//! 4. single-use manual authorization, when configured (FAILING_OVER only)
//!
//! The machine is single-writer: callers serialize `transition`/`evaluate`
//! (the daemon holds it behind a `tokio::sync::Mutex`). Registrar I/O for a
//! side effect runs inside that critical section, which keeps a concurrent
//! evaluation from re-entering mid-switch.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod ledger;
pub mod log;

pub use config::{FailoverConfig, ScoreScale, Thresholds};
pub use error::{FailoverError, SafetyRejection, ValidationError};
pub use ledger::FailoverLedger;
pub use log::TransitionLog;

use chrono::{DateTime, Utc};
use nsguard_core::{Clock, RegistrarError};
use nsguard_proto::{
    ControllerState, DnsBinding, Provider, ProviderId, ProviderRole, TransitionRecord,
};
use nsguard_registrar::RegistrarDriver;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

/// True when `from -> to` is an edge of the transition graph. Everything
/// else, including self-loops, is rejected.
pub fn edge_allowed(from: ControllerState, to: ControllerState) -> bool {
    use ControllerState::*;
    matches!(
        (from, to),
        (Healthy, Degraded)
            | (Degraded, Healthy)
            | (Degraded, FailingOver)
            | (FailingOver, FailedOver)
            | (FailedOver, Recovering)
            | (Recovering, Healthy)
            | (Recovering, FailedOver)
    )
}

/// Serializable snapshot of everything a restarted controller needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub state: ControllerState,
    pub entered_at: DateTime<Utc>,
    pub authorized: bool,
    pub transitions: Vec<TransitionRecord>,
    pub ledger: FailoverLedger,
    pub binding: DnsBinding,
}

/// Point-in-time view for status surfaces. Cloned out under the state lock
/// so readers never hold it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub entered_at: DateTime<Utc>,
    pub authorized: bool,
    pub binding: DnsBinding,
    pub recent_transitions: Vec<TransitionRecord>,
}

pub struct FailoverMachine {
    config: FailoverConfig,
    primary: Provider,
    secondary: Provider,
    driver: RegistrarDriver,
    clock: Arc<dyn Clock>,
    state: ControllerState,
    entered_at: DateTime<Utc>,
    ledger: FailoverLedger,
    log: TransitionLog,
    authorized: bool,
}

impl std::fmt::Debug for FailoverMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverMachine")
            .field("config", &self.config)
            .field("primary", &self.primary)
            .field("secondary", &self.secondary)
            .field("state", &self.state)
            .field("entered_at", &self.entered_at)
            .field("authorized", &self.authorized)
            .finish_non_exhaustive()
    }
}

impl FailoverMachine {
    /// Build a machine starting HEALTHY with the primary provider active.
    pub fn new(
        config: FailoverConfig,
        primary: Provider,
        secondary: Provider,
        driver: RegistrarDriver,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ValidationError> {
        validate_roles(&primary, &secondary)?;
        let entered_at = clock.now();
        Ok(Self {
            config,
            primary,
            secondary,
            driver,
            clock,
            state: ControllerState::Healthy,
            entered_at,
            ledger: FailoverLedger::new(),
            log: TransitionLog::new(),
            authorized: false,
        })
    }

    /// Rebuild a machine from a persisted snapshot.
    pub fn restore(
        config: FailoverConfig,
        primary: Provider,
        secondary: Provider,
        driver: RegistrarDriver,
        clock: Arc<dyn Clock>,
        snapshot: ControllerSnapshot,
    ) -> Result<Self, ValidationError> {
        validate_roles(&primary, &secondary)?;
        let log = TransitionLog::from_records(snapshot.transitions);
        if !log.verify_chain() {
            warn!("transition log failed chain verification; keeping records as-is");
        }
        driver.adopt_binding(snapshot.binding);
        Ok(Self {
            config,
            primary,
            secondary,
            driver,
            clock,
            state: snapshot.state,
            entered_at: snapshot.entered_at,
            ledger: snapshot.ledger,
            log,
            authorized: snapshot.authorized,
        })
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn entered_at(&self) -> DateTime<Utc> {
        self.entered_at
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Set the single-use failover authorization flag.
    pub fn authorize(&mut self) {
        self.authorized = true;
        info!("manual failover authorization set");
    }

    pub fn ledger(&self) -> &FailoverLedger {
        &self.ledger
    }

    pub fn transition_log(&self) -> &TransitionLog {
        &self.log
    }

    pub fn driver(&self) -> &RegistrarDriver {
        &self.driver
    }

    pub fn binding(&self) -> DnsBinding {
        self.driver.binding()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.state,
            entered_at: self.entered_at,
            authorized: self.authorized,
            transitions: self.log.records().to_vec(),
            ledger: self.ledger.clone(),
            binding: self.driver.binding(),
        }
    }

    pub fn status(&self, last_n: usize) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            entered_at: self.entered_at,
            authorized: self.authorized,
            binding: self.driver.binding(),
            recent_transitions: self.log.recent(last_n).to_vec(),
        }
    }

    /// Validate and commit a transition to `target`.
    ///
    /// Side effects tied to the target (the registrar switch) run before the
    /// commit; a registrar failure or unverified propagation leaves the
    /// machine in its pre-transition state.
    pub async fn transition(
        &mut self,
        target: ControllerState,
        reason: &str,
    ) -> Result<(), FailoverError> {
        self.transition_as(target, reason, None).await
    }

    /// Like [`FailoverMachine::transition`], attributing the change to an
    /// operator in the transition record.
    pub async fn transition_as(
        &mut self,
        target: ControllerState,
        reason: &str,
        operator: Option<&str>,
    ) -> Result<(), FailoverError> {
        if target == self.state {
            return Err(ValidationError::SelfTransition(target).into());
        }
        if !edge_allowed(self.state, target) {
            return Err(SafetyRejection::InvalidTransition {
                from: self.state,
                to: target,
            }
            .into());
        }

        // Read the clock once inside the critical section; entry timestamps
        // must be strictly monotonic.
        let now = self.clock.now();
        if now <= self.entered_at {
            return Err(ValidationError::ClockRegression {
                now,
                entered_at: self.entered_at,
            }
            .into());
        }

        let elapsed = now - self.entered_at;
        if elapsed < self.config.min_time_in_state {
            return Err(SafetyRejection::MinTimeInState {
                elapsed_secs: elapsed.num_seconds(),
                required_secs: self.config.min_time_in_state.num_seconds(),
            }
            .into());
        }

        if target == ControllerState::FailingOver {
            self.check_failover_gates(now)?;
        }

        // Side effects before the commit. The ledger entry lands before the
        // state change becomes observable.
        match (self.state, target) {
            (_, ControllerState::FailingOver) => {
                self.execute_failover().await?;
                self.ledger.record(now);
                self.authorized = false;
            }
            (ControllerState::Recovering, ControllerState::Healthy) => {
                self.execute_recovery().await?;
            }
            _ => {}
        }

        let record = self
            .log
            .append(self.state, target, now, reason, operator.map(String::from));
        info!(
            from = %record.from,
            to = %record.to,
            reason,
            operator = operator.unwrap_or("-"),
            "state transition committed"
        );
        self.state = target;
        self.entered_at = now;
        Ok(())
    }

    fn check_failover_gates(&self, now: DateTime<Utc>) -> Result<(), SafetyRejection> {
        if let Some(last) = self.ledger.last_failover_at() {
            let since = now - last;
            if since < self.config.failover_cooldown {
                return Err(SafetyRejection::CooldownActive {
                    since_last_secs: since.num_seconds(),
                    cooldown_secs: self.config.failover_cooldown.num_seconds(),
                });
            }
        }

        let today = self.ledger.count_on_day(now.date_naive());
        if today >= self.config.max_daily_failovers {
            return Err(SafetyRejection::DailyCeilingReached {
                count: today,
                max: self.config.max_daily_failovers,
            });
        }

        if self.config.require_manual_auth && !self.authorized {
            return Err(SafetyRejection::NotAuthorized);
        }
        Ok(())
    }

    /// Switch the zone's delegation to the secondary provider and confirm
    /// propagation.
    async fn execute_failover(&self) -> Result<(), FailoverError> {
        let reason = format!("failover to {}", self.secondary.id);
        self.driver.switch_to(&self.secondary, &reason).await?;
        if !self.driver.confirm_propagation().await? {
            error!(provider = %self.secondary.id, "failover aborted: propagation unverified");
            return Err(RegistrarError::PropagationUnverified {
                domain: self.driver.zone().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Restore the zone's delegation to the primary provider and confirm
    /// propagation.
    async fn execute_recovery(&self) -> Result<(), FailoverError> {
        let reason = format!("recovery back to {}", self.primary.id);
        self.driver.switch_to(&self.primary, &reason).await?;
        if !self.driver.confirm_propagation().await? {
            error!(provider = %self.primary.id, "recovery aborted: propagation unverified");
            return Err(RegistrarError::PropagationUnverified {
                domain: self.driver.zone().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Consult the per-state thresholds and attempt the indicated
    /// transition.
    ///
    /// Safety rejections are the machine declining to act and are swallowed
    /// (logged at info); `Ok(Some(state))` reports a committed transition.
    /// Scores must be on the instance's scale and cover the primary
    /// provider.
    pub async fn evaluate(
        &mut self,
        scores: &HashMap<ProviderId, f64>,
    ) -> Result<Option<ControllerState>, FailoverError> {
        for (id, score) in scores {
            self.config.scale.validate(*score)?;
            if *id != self.primary.id && *id != self.secondary.id {
                return Err(ValidationError::UnknownProvider(id.clone()).into());
            }
        }
        let score = *scores
            .get(&self.primary.id)
            .ok_or_else(|| ValidationError::UnknownProvider(self.primary.id.clone()))?;

        let Some((target, reason)) = self.decide(score) else {
            return Ok(None);
        };

        match self.transition(target, &reason).await {
            Ok(()) => Ok(Some(target)),
            Err(FailoverError::Safety(rejection)) => {
                info!(
                    current = %self.state,
                    wanted = %target,
                    %rejection,
                    "transition deferred by safety gate"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn decide(&self, score: f64) -> Option<(ControllerState, String)> {
        use ControllerState::*;
        let t = &self.config.thresholds;
        match self.state {
            Healthy => (score < t.degrade_below).then(|| {
                (
                    Degraded,
                    format!("primary score {score:.2} below degraded threshold"),
                )
            }),
            Degraded => {
                if score >= t.recover_at {
                    Some((
                        Healthy,
                        format!("primary score {score:.2} recovered"),
                    ))
                } else if score < t.failover_below {
                    Some((
                        FailingOver,
                        format!("primary score {score:.2} below failover threshold"),
                    ))
                } else {
                    None
                }
            }
            // Side effects already ran on entry; move on unconditionally.
            FailingOver => Some((FailedOver, "failover side effects complete".to_string())),
            FailedOver => (score >= t.recover_at).then(|| {
                (
                    Recovering,
                    format!("primary score {score:.2} recovered, watching"),
                )
            }),
            Recovering => {
                if score < t.degrade_below {
                    Some((
                        FailedOver,
                        format!("primary score {score:.2} re-degraded during recovery"),
                    ))
                } else if score >= t.recover_at {
                    Some((Healthy, format!("primary score {score:.2} stable")))
                } else {
                    None
                }
            }
        }
    }

    /// Operator-driven failover. Requires the single-use authorization flag
    /// regardless of profile, then passes through the normal gates.
    pub async fn force_failover(&mut self, operator: &str) -> Result<(), FailoverError> {
        if !self.authorized {
            return Err(SafetyRejection::NotAuthorized.into());
        }
        self.transition_as(
            ControllerState::FailingOver,
            "manual failover requested",
            Some(operator),
        )
        .await
    }
}

fn validate_roles(primary: &Provider, secondary: &Provider) -> Result<(), ValidationError> {
    if primary.role != ProviderRole::Primary {
        return Err(ValidationError::ProviderConfig(format!(
            "provider '{}' configured as primary but has role {}",
            primary.id, primary.role
        )));
    }
    if secondary.role != ProviderRole::Secondary {
        return Err(ValidationError::ProviderConfig(format!(
            "provider '{}' configured as secondary but has role {}",
            secondary.id, secondary.role
        )));
    }
    if primary.id == secondary.id {
        return Err(ValidationError::ProviderConfig(format!(
            "primary and secondary must differ, both are '{}'",
            primary.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nsguard_core::testing::{FakeClock, MockRegistrar};
    use nsguard_registrar::default_patterns;
    use std::sync::Arc;

    fn provider(id: &str, role: ProviderRole, endpoints: &[&str]) -> Provider {
        Provider {
            id: ProviderId::new(id),
            display_name: id.to_string(),
            role,
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn primary() -> Provider {
        provider(
            "cloudflare",
            ProviderRole::Primary,
            &["ns1.cloudflare.net", "ns2.cloudflare.net"],
        )
    }

    fn secondary() -> Provider {
        provider(
            "route53",
            ProviderRole::Secondary,
            &["ns-1.awsdns.org", "ns-2.awsdns.org"],
        )
    }

    struct Rig {
        machine: FailoverMachine,
        clock: Arc<FakeClock>,
        registrar: Arc<MockRegistrar>,
    }

    fn rig(config: FailoverConfig) -> Rig {
        let clock = FakeClock::new();
        let registrar = MockRegistrar::new(primary().endpoints.clone());
        let driver = RegistrarDriver::new(
            registrar.clone(),
            clock.clone(),
            "example.com",
            &primary(),
            default_patterns(),
        );
        let machine =
            FailoverMachine::new(config, primary(), secondary(), driver, clock.clone()).unwrap();
        Rig {
            machine,
            clock,
            registrar,
        }
    }

    fn unit_scores(score: f64) -> HashMap<ProviderId, f64> {
        HashMap::from([
            (ProviderId::new("cloudflare"), score),
            (ProviderId::new("route53"), 0.95),
        ])
    }

    #[tokio::test]
    async fn invalid_edge_is_rejected_with_state_and_log_unchanged() {
        let mut r = rig(FailoverConfig::simplified());
        r.clock.advance_secs(61);

        let err = r
            .machine
            .transition(ControllerState::FailedOver, "skip ahead")
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains("invalid transition"),
            "got: {err}"
        );
        assert!(err.is_safety_rejection());
        assert_eq!(r.machine.state(), ControllerState::Healthy);
        assert!(r.machine.transition_log().is_empty());
    }

    #[tokio::test]
    async fn self_transition_is_a_validation_error() {
        let mut r = rig(FailoverConfig::simplified());
        r.clock.advance_secs(61);
        let err = r
            .machine
            .transition(ControllerState::Healthy, "noop")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FailoverError::Validation(ValidationError::SelfTransition(_))
        ));
    }

    #[tokio::test]
    async fn min_time_gate_blocks_and_equality_passes() {
        let mut r = rig(FailoverConfig::simplified());

        r.clock.advance_secs(59);
        let err = r
            .machine
            .transition(ControllerState::Degraded, "too soon")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FailoverError::Safety(SafetyRejection::MinTimeInState { .. })
        ));

        // Exactly min_time_in_state: equality passes.
        r.clock.advance_secs(1);
        r.machine
            .transition(ControllerState::Degraded, "on the boundary")
            .await
            .unwrap();
        assert_eq!(r.machine.state(), ControllerState::Degraded);
    }

    #[tokio::test]
    async fn clock_regression_is_rejected() {
        let mut r = rig(FailoverConfig::simplified());
        let err = r
            .machine
            .transition(ControllerState::Degraded, "no time has passed")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FailoverError::Validation(ValidationError::ClockRegression { .. })
        ));
    }

    #[tokio::test]
    async fn failover_switches_ns_and_consumes_authorization() {
        let config = FailoverConfig::simplified().with_manual_auth(true);
        let mut r = rig(config);

        r.clock.advance_secs(61);
        r.machine
            .transition(ControllerState::Degraded, "primary degraded")
            .await
            .unwrap();

        // Gate 4: no authorization yet.
        r.clock.advance_secs(61);
        let err = r
            .machine
            .transition(ControllerState::FailingOver, "failover")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FailoverError::Safety(SafetyRejection::NotAuthorized)
        ));

        r.machine.authorize();
        r.machine
            .transition(ControllerState::FailingOver, "failover")
            .await
            .unwrap();

        assert_eq!(r.registrar.update_count(), 1);
        assert_eq!(
            r.registrar.updates()[0].reason,
            "failover to route53"
        );
        assert_eq!(
            r.machine.binding().active_provider,
            ProviderId::new("route53")
        );
        assert!(r.machine.binding().propagation_verified);
        assert_eq!(r.machine.ledger().len(), 1);
        // Single-use flag was consumed.
        assert!(!r.machine.is_authorized());
    }

    #[tokio::test]
    async fn registrar_failure_aborts_and_preserves_state() {
        let mut r = rig(FailoverConfig::simplified());
        r.clock.advance_secs(61);
        r.machine
            .transition(ControllerState::Degraded, "primary degraded")
            .await
            .unwrap();

        r.registrar.fail_updates("api unavailable");
        r.clock.advance_secs(61);
        let err = r
            .machine
            .transition(ControllerState::FailingOver, "failover")
            .await
            .unwrap_err();
        assert!(matches!(err, FailoverError::Registrar(_)));
        assert_eq!(r.machine.state(), ControllerState::Degraded);
        assert!(r.machine.ledger().is_empty());
        // Only the DEGRADED entry is in the log.
        assert_eq!(r.machine.transition_log().len(), 1);
    }

    #[tokio::test]
    async fn unverified_propagation_aborts_failover() {
        let mut r = rig(FailoverConfig::simplified());
        r.clock.advance_secs(61);
        r.machine
            .transition(ControllerState::Degraded, "primary degraded")
            .await
            .unwrap();

        r.registrar.set_verify_result(false);
        r.clock.advance_secs(61);
        let err = r
            .machine
            .transition(ControllerState::FailingOver, "failover")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FailoverError::Registrar(RegistrarError::PropagationUnverified { .. })
        ));
        assert_eq!(r.machine.state(), ControllerState::Degraded);
        assert!(r.machine.ledger().is_empty());
    }

    #[tokio::test]
    async fn evaluate_swallows_safety_rejections() {
        let mut r = rig(FailoverConfig::simplified());
        // Score collapsed but min-time in HEALTHY is unmet: evaluate
        // reports no transition instead of erroring.
        let outcome = r.machine.evaluate(&unit_scores(0.1)).await.unwrap();
        assert_eq!(outcome, None);
        assert_eq!(r.machine.state(), ControllerState::Healthy);
    }

    #[tokio::test]
    async fn evaluate_rejects_out_of_scale_scores() {
        let mut r = rig(FailoverConfig::simplified());
        r.clock.advance_secs(61);
        let err = r.machine.evaluate(&unit_scores(1.5)).await.unwrap_err();
        assert!(matches!(
            err,
            FailoverError::Validation(ValidationError::ScoreOutOfRange { .. })
        ));
    }

    #[tokio::test]
    async fn evaluate_rejects_unknown_providers() {
        let mut r = rig(FailoverConfig::simplified());
        r.clock.advance_secs(61);
        let scores = HashMap::from([(ProviderId::new("gandi"), 0.4)]);
        let err = r.machine.evaluate(&scores).await.unwrap_err();
        assert!(matches!(
            err,
            FailoverError::Validation(ValidationError::UnknownProvider(_))
        ));
    }

    #[tokio::test]
    async fn force_failover_requires_authorization() {
        let mut r = rig(FailoverConfig::simplified());
        r.clock.advance_secs(61);
        r.machine
            .transition(ControllerState::Degraded, "primary degraded")
            .await
            .unwrap();
        r.clock.advance_secs(61);

        let err = r.machine.force_failover("alice").await.unwrap_err();
        assert!(matches!(
            err,
            FailoverError::Safety(SafetyRejection::NotAuthorized)
        ));

        r.machine.authorize();
        r.machine.force_failover("alice").await.unwrap();
        assert_eq!(r.machine.state(), ControllerState::FailingOver);
        assert_eq!(
            r.machine.transition_log().last().unwrap().operator.as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn status_reports_a_consistent_snapshot() {
        let mut r = rig(FailoverConfig::simplified());
        r.clock.advance_secs(61);
        r.machine
            .transition(ControllerState::Degraded, "primary degraded")
            .await
            .unwrap();

        let status = r.machine.status(5);
        assert_eq!(status.state, ControllerState::Degraded);
        assert_eq!(status.entered_at, r.machine.entered_at());
        assert_eq!(status.binding.active_provider, ProviderId::new("cloudflare"));
        assert_eq!(status.recent_transitions.len(), 1);
        assert_eq!(status.recent_transitions[0].reason, "primary degraded");
        assert!(!status.authorized);
    }

    #[tokio::test]
    async fn snapshot_restore_round_trips() {
        let mut r = rig(FailoverConfig::simplified());
        r.clock.advance_secs(61);
        r.machine
            .transition(ControllerState::Degraded, "primary degraded")
            .await
            .unwrap();

        let snapshot = r.machine.snapshot();
        let registrar = MockRegistrar::new(primary().endpoints.clone());
        let driver = RegistrarDriver::new(
            registrar,
            r.clock.clone(),
            "example.com",
            &primary(),
            default_patterns(),
        );
        let restored = FailoverMachine::restore(
            FailoverConfig::simplified(),
            primary(),
            secondary(),
            driver,
            r.clock.clone(),
            snapshot,
        )
        .unwrap();

        assert_eq!(restored.state(), ControllerState::Degraded);
        assert_eq!(restored.transition_log().len(), 1);
        assert!(restored.transition_log().verify_chain());
    }

    #[tokio::test]
    async fn misconfigured_roles_are_rejected() {
        let clock = FakeClock::new();
        let registrar = MockRegistrar::new(vec![]);
        let driver = RegistrarDriver::new(
            registrar,
            clock.clone(),
            "example.com",
            &primary(),
            default_patterns(),
        );
        let err = FailoverMachine::new(
            FailoverConfig::simplified(),
            secondary(), // wrong role in the primary slot
            primary(),
            driver,
            clock,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::ProviderConfig(_)));
    }
}
