//! The four safety gates, exercised the way an outage would hit them.

use chrono::Duration;
use nsguard_machine::{FailoverConfig, FailoverError, SafetyRejection};
use nsguard_proto::ControllerState;
use nsguard_tests::Rig;

fn fast_config() -> FailoverConfig {
    FailoverConfig::simplified()
        .with_min_time_in_state(Duration::seconds(10))
        .with_cooldown(Duration::seconds(300))
}

/// Drive one complete outage-and-recovery cycle with 11 s ticks (~55 s).
async fn run_cycle(rig: &mut Rig) {
    assert_eq!(rig.tick(11, 0.1).await, Some(ControllerState::Degraded));
    assert_eq!(rig.tick(11, 0.1).await, Some(ControllerState::FailingOver));
    assert_eq!(rig.tick(11, 0.1).await, Some(ControllerState::FailedOver));
    assert_eq!(rig.tick(11, 0.95).await, Some(ControllerState::Recovering));
    assert_eq!(rig.tick(11, 0.95).await, Some(ControllerState::Healthy));
}

#[tokio::test]
async fn cooldown_blocks_second_failover() {
    let mut rig = Rig::new(fast_config());
    run_cycle(&mut rig).await;

    // The outage returns right away.
    assert_eq!(rig.tick(11, 0.1).await, Some(ControllerState::Degraded));

    // Roughly 77 s since the failover, far inside the 300 s cooldown: the
    // machine refuses to thrash and stays DEGRADED.
    assert_eq!(rig.tick(11, 0.1).await, None);
    assert_eq!(rig.machine.state(), ControllerState::Degraded);
    assert_eq!(rig.registrar.update_count(), 2);

    // Once the cooldown has fully elapsed the failover goes through.
    assert_eq!(
        rig.tick(300, 0.1).await,
        Some(ControllerState::FailingOver)
    );
}

#[tokio::test]
async fn daily_ceiling_blocks_third_failover() {
    let config = fast_config()
        .with_cooldown(Duration::seconds(30))
        .with_max_daily_failovers(2);
    let mut rig = Rig::new(config);

    run_cycle(&mut rig).await;
    run_cycle(&mut rig).await;
    assert_eq!(rig.machine.ledger().len(), 2);

    // Third outage of the day: evaluation declines to fail over.
    assert_eq!(rig.tick(31, 0.1).await, Some(ControllerState::Degraded));
    assert_eq!(rig.tick(31, 0.1).await, None);
    assert_eq!(rig.machine.state(), ControllerState::Degraded);
    assert_eq!(rig.registrar.update_count(), 4);
}

#[tokio::test]
async fn invalid_edge_is_rejected_without_side_effects() {
    let mut rig = Rig::new(FailoverConfig::simplified());
    rig.clock.advance_secs(61);

    let err = rig
        .machine
        .transition(ControllerState::FailedOver, "jump the graph")
        .await
        .unwrap_err();
    match err {
        FailoverError::Safety(rejection @ SafetyRejection::InvalidTransition { .. }) => {
            assert!(rejection.to_string().contains("invalid transition"));
        }
        other => panic!("expected invalid-transition rejection, got {other}"),
    }
    assert_eq!(rig.machine.state(), ControllerState::Healthy);
    assert!(rig.machine.transition_log().is_empty());
    assert_eq!(rig.registrar.update_count(), 0);
}

#[tokio::test]
async fn manual_authorization_gates_and_is_consumed() {
    let mut rig = Rig::new(FailoverConfig::simplified().with_manual_auth(true));

    assert_eq!(rig.tick(61, 0.1).await, Some(ControllerState::Degraded));

    // Gate 4 holds: without the flag the machine stays put.
    assert_eq!(rig.tick(61, 0.1).await, None);
    assert_eq!(rig.machine.state(), ControllerState::Degraded);

    rig.machine.authorize();
    assert!(rig.machine.is_authorized());
    assert_eq!(rig.tick(61, 0.1).await, Some(ControllerState::FailingOver));

    // Single use: the flag is gone after the failover it authorized.
    assert!(!rig.machine.is_authorized());
}

#[tokio::test]
async fn min_time_holds_transitions_back() {
    let mut rig = Rig::new(FailoverConfig::simplified());

    // Score is bad but HEALTHY was entered less than a minute ago.
    assert_eq!(rig.tick(30, 0.1).await, None);
    assert_eq!(rig.machine.state(), ControllerState::Healthy);

    // Dwell time satisfied on a later tick.
    assert_eq!(rig.tick(31, 0.1).await, Some(ControllerState::Degraded));
}

#[tokio::test]
async fn registrar_outage_keeps_machine_in_degraded() {
    let mut rig = Rig::new(FailoverConfig::simplified());
    assert_eq!(rig.tick(61, 0.1).await, Some(ControllerState::Degraded));

    rig.registrar.fail_updates("registrar maintenance window");
    rig.clock.advance_secs(61);
    let err = rig
        .machine
        .evaluate(&nsguard_tests::unit_scores(0.1))
        .await
        .unwrap_err();
    assert!(matches!(err, FailoverError::Registrar(_)));
    assert_eq!(rig.machine.state(), ControllerState::Degraded);
    assert!(rig.machine.ledger().is_empty());

    // Registrar comes back; the retry is not blocked by cooldown because
    // the failed attempt never reached the ledger.
    rig.registrar.clear_failures();
    rig.clock.advance_secs(61);
    assert_eq!(
        rig.machine
            .evaluate(&nsguard_tests::unit_scores(0.1))
            .await
            .unwrap(),
        Some(ControllerState::FailingOver)
    );
    assert_eq!(rig.machine.ledger().len(), 1);
}
