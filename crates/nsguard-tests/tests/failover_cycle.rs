//! End-to-end failover cycles on the simplified profile, driven entirely
//! by a virtual clock and a scripted registrar.

use nsguard_machine::FailoverConfig;
use nsguard_proto::{ControllerState, ProviderId};
use nsguard_tests::{Rig, primary, secondary};

#[tokio::test]
async fn full_failover_cycle_returns_to_primary() {
    let mut rig = Rig::new(FailoverConfig::simplified());

    // Primary degrades: no NS change yet.
    assert_eq!(rig.tick(61, 0.3).await, Some(ControllerState::Degraded));
    assert_eq!(rig.registrar.update_count(), 0);

    // Primary collapses: failover executes against the registrar.
    assert_eq!(rig.tick(61, 0.1).await, Some(ControllerState::FailingOver));
    assert_eq!(rig.registrar.update_count(), 1);
    assert_eq!(rig.registrar.current_nameservers(), secondary().endpoints);
    assert_eq!(rig.registrar.updates()[0].reason, "failover to route53");
    let binding = rig.machine.binding();
    assert_eq!(binding.active_provider, ProviderId::new("route53"));
    assert!(binding.propagation_verified);

    // Side effects complete: settle on the secondary.
    assert_eq!(rig.tick(61, 0.1).await, Some(ControllerState::FailedOver));

    // Primary comes back: watch it, then switch home.
    assert_eq!(rig.tick(61, 0.95).await, Some(ControllerState::Recovering));
    assert_eq!(rig.tick(61, 0.95).await, Some(ControllerState::Healthy));

    assert_eq!(rig.registrar.update_count(), 2);
    assert_eq!(rig.registrar.current_nameservers(), primary().endpoints);
    assert_eq!(
        rig.registrar.updates()[1].reason,
        "recovery back to cloudflare"
    );

    // Round trip: active provider is the primary again, five transitions
    // recorded, exactly two registrar updates.
    assert_eq!(
        rig.machine.binding().active_provider,
        ProviderId::new("cloudflare")
    );
    assert_eq!(rig.machine.transition_log().len(), 5);
    assert!(rig.machine.transition_log().verify_chain());
    assert_eq!(rig.machine.ledger().len(), 1);
}

#[tokio::test]
async fn recovery_abort_leaves_secondary_active() {
    let mut rig = Rig::new(FailoverConfig::simplified());

    assert_eq!(rig.tick(61, 0.3).await, Some(ControllerState::Degraded));
    assert_eq!(rig.tick(61, 0.1).await, Some(ControllerState::FailingOver));
    assert_eq!(rig.tick(61, 0.1).await, Some(ControllerState::FailedOver));
    assert_eq!(rig.tick(61, 0.95).await, Some(ControllerState::Recovering));

    // The primary relapses mid-recovery: abort back to FAILED_OVER with no
    // further registrar traffic.
    assert_eq!(rig.tick(61, 0.3).await, Some(ControllerState::FailedOver));
    assert_eq!(
        rig.machine.binding().active_provider,
        ProviderId::new("route53")
    );
    assert_eq!(rig.registrar.update_count(), 1);
}

#[tokio::test]
async fn steady_states_produce_no_transitions() {
    let mut rig = Rig::new(FailoverConfig::simplified());

    // Healthy primary: nothing to do, tick after tick.
    assert_eq!(rig.tick(61, 0.9).await, None);
    assert_eq!(rig.tick(61, 0.8).await, None);

    // The middle band while degraded holds steady too.
    assert_eq!(rig.tick(61, 0.3).await, Some(ControllerState::Degraded));
    assert_eq!(rig.tick(61, 0.35).await, None);
    assert_eq!(rig.machine.state(), ControllerState::Degraded);
    assert_eq!(rig.machine.transition_log().len(), 1);
}

#[tokio::test]
async fn transition_timestamps_strictly_increase_through_cycle() {
    let mut rig = Rig::new(FailoverConfig::simplified());
    rig.tick(61, 0.3).await;
    rig.tick(61, 0.1).await;
    rig.tick(61, 0.1).await;
    rig.tick(61, 0.95).await;
    rig.tick(61, 0.95).await;

    let records = rig.machine.transition_log().records();
    assert_eq!(records.len(), 5);
    for pair in records.windows(2) {
        assert!(
            pair[1].at > pair[0].at,
            "entry timestamps must strictly increase"
        );
    }
}
