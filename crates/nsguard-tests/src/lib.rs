//! Shared rig for the nsguard integration suite.
//!
//! A [`Rig`] is a complete controller on scripted dependencies: virtual
//! clock, in-memory registrar, and whatever profile the test asks for.
//! Time only moves when the test advances it.

use nsguard_core::testing::{FakeClock, MockRegistrar};
use nsguard_machine::{FailoverConfig, FailoverMachine};
use nsguard_proto::{Provider, ProviderId, ProviderRole};
use nsguard_registrar::{RegistrarDriver, default_patterns};
use std::collections::HashMap;
use std::sync::Arc;

pub fn primary() -> Provider {
    Provider {
        id: ProviderId::new("cloudflare"),
        display_name: "Cloudflare".to_string(),
        role: ProviderRole::Primary,
        endpoints: vec![
            "ns1.cloudflare.net".to_string(),
            "ns2.cloudflare.net".to_string(),
        ],
    }
}

pub fn secondary() -> Provider {
    Provider {
        id: ProviderId::new("route53"),
        display_name: "AWS Route 53".to_string(),
        role: ProviderRole::Secondary,
        endpoints: vec![
            "ns-1.awsdns-00.org".to_string(),
            "ns-2.awsdns-01.net".to_string(),
        ],
    }
}

pub struct Rig {
    pub machine: FailoverMachine,
    pub clock: Arc<FakeClock>,
    pub registrar: Arc<MockRegistrar>,
}

impl Rig {
    pub fn new(config: FailoverConfig) -> Self {
        let clock = FakeClock::new();
        let registrar = MockRegistrar::new(primary().endpoints);
        let driver = RegistrarDriver::new(
            registrar.clone(),
            clock.clone(),
            "example.com",
            &primary(),
            default_patterns(),
        );
        let machine = FailoverMachine::new(config, primary(), secondary(), driver, clock.clone())
            .expect("valid rig configuration");
        Self {
            machine,
            clock,
            registrar,
        }
    }

    /// Advance the virtual clock, then evaluate with the primary at
    /// `primary_score` (unit scale) and a healthy secondary.
    pub async fn tick(
        &mut self,
        advance_secs: i64,
        primary_score: f64,
    ) -> Option<nsguard_proto::ControllerState> {
        self.clock.advance_secs(advance_secs);
        self.machine
            .evaluate(&unit_scores(primary_score))
            .await
            .expect("evaluation must not error in rig ticks")
    }
}

/// Unit-scale score map: the primary at `primary_score`, the secondary
/// healthy.
pub fn unit_scores(primary_score: f64) -> HashMap<ProviderId, f64> {
    HashMap::from([
        (ProviderId::new("cloudflare"), primary_score),
        (ProviderId::new("route53"), 0.95),
    ])
}
