//! Registrar driver.
//!
//! Thin protocol around the injected [`Registrar`]: reads and writes the
//! zone's authoritative NS set, keeps an append-only update history, owns
//! the local [`DnsBinding`] mirror, and identifies providers from NS
//! hostnames via a configured pattern table.

#![forbid(unsafe_code)]

pub mod http;

pub use http::HttpRegistrar;

use chrono::{DateTime, Utc};
use nsguard_core::{Clock, Registrar, RegistrarError};
use nsguard_proto::{DnsBinding, Provider, ProviderId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

// ─── NS pattern table ────────────────────────────────────────────────────────

/// Maps an NS hostname substring to a provider identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsPattern {
    pub substring: String,
    pub provider: String,
}

impl NsPattern {
    pub fn new(substring: &str, provider: &str) -> Self {
        Self {
            substring: substring.to_string(),
            provider: provider.to_string(),
        }
    }
}

/// The vendors seen in the wild most often. First match wins.
pub fn default_patterns() -> Vec<NsPattern> {
    vec![
        NsPattern::new("cloudflare", "cloudflare"),
        NsPattern::new("awsdns", "route53"),
        NsPattern::new("route53", "route53"),
    ]
}

// ─── Update history ──────────────────────────────────────────────────────────

/// One recorded NS delegation change. Appended on every successful update;
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsUpdateRecord {
    pub zone: String,
    pub old_nameservers: Vec<String>,
    pub new_nameservers: Vec<String>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

// ─── Propagation polling ─────────────────────────────────────────────────────

/// Poll settings for propagation confirmation. Without these the driver
/// asks the oracle exactly once.
#[derive(Debug, Clone, Copy)]
pub struct PropagationPoll {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PropagationPoll {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            interval: Duration::from_secs(5),
        }
    }
}

// ─── Driver ──────────────────────────────────────────────────────────────────

pub struct RegistrarDriver {
    registrar: Arc<dyn Registrar>,
    clock: Arc<dyn Clock>,
    zone: String,
    patterns: Vec<NsPattern>,
    poll: Option<PropagationPoll>,
    binding: RwLock<DnsBinding>,
    history: RwLock<Vec<NsUpdateRecord>>,
}

impl RegistrarDriver {
    /// Create a driver whose binding starts on `initial`, the provider the
    /// zone is delegated to before any failover.
    pub fn new(
        registrar: Arc<dyn Registrar>,
        clock: Arc<dyn Clock>,
        zone: &str,
        initial: &Provider,
        patterns: Vec<NsPattern>,
    ) -> Self {
        Self {
            registrar,
            clock,
            zone: zone.to_string(),
            patterns,
            poll: None,
            binding: RwLock::new(DnsBinding {
                zone: zone.to_string(),
                active_provider: initial.id.clone(),
                nameservers: initial.endpoints.clone(),
                propagation_verified: true,
            }),
            history: RwLock::new(Vec::new()),
        }
    }

    /// Confirm propagation by polling the oracle instead of asking once.
    pub fn with_propagation_poll(mut self, poll: PropagationPoll) -> Self {
        self.poll = Some(poll);
        self
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Snapshot of the local binding mirror.
    pub fn binding(&self) -> DnsBinding {
        self.binding.read().clone()
    }

    /// Replace the mirror with a binding restored from a controller
    /// snapshot. Only used when rebuilding state after a restart.
    pub fn adopt_binding(&self, binding: DnsBinding) {
        *self.binding.write() = binding;
    }

    /// All recorded NS updates, oldest first.
    pub fn history(&self) -> Vec<NsUpdateRecord> {
        self.history.read().clone()
    }

    /// Identify the provider behind an NS hostname. Unmatched hosts are
    /// reported as `"unknown"`.
    pub fn provider_for_ns(&self, host: &str) -> &str {
        let host = host.to_ascii_lowercase();
        self.patterns
            .iter()
            .find(|p| host.contains(&p.substring.to_ascii_lowercase()))
            .map(|p| p.provider.as_str())
            .unwrap_or("unknown")
    }

    /// Read the NS set currently delegated at the registrar.
    pub async fn current_nameservers(&self) -> Result<Vec<String>, RegistrarError> {
        self.registrar.get_nameservers(&self.zone).await
    }

    /// Re-read the registrar and overwrite the local mirror with what it
    /// actually serves. Used at startup to catch drift.
    pub async fn refresh_binding(&self) -> Result<DnsBinding, RegistrarError> {
        let nameservers = self.registrar.get_nameservers(&self.zone).await?;
        let provider = nameservers
            .first()
            .map(|ns| self.provider_for_ns(ns).to_string())
            .unwrap_or_else(|| "unknown".to_string());

        let mut binding = self.binding.write();
        if binding.active_provider.as_str() != provider {
            warn!(
                zone = %self.zone,
                expected = %binding.active_provider,
                observed = %provider,
                "registrar delegation differs from local mirror"
            );
        }
        binding.active_provider = ProviderId::new(provider);
        binding.nameservers = nameservers;
        Ok(binding.clone())
    }

    /// Delegate the zone to `target`'s nameservers.
    ///
    /// On success the update is recorded in the history and the binding
    /// mirror points at `target` with propagation marked unverified.
    pub async fn switch_to(&self, target: &Provider, reason: &str) -> Result<(), RegistrarError> {
        let old = self.binding.read().nameservers.clone();

        self.registrar
            .update_nameservers(&self.zone, &target.endpoints, reason)
            .await?;

        let at = self.clock.now();
        self.history.write().push(NsUpdateRecord {
            zone: self.zone.clone(),
            old_nameservers: old,
            new_nameservers: target.endpoints.clone(),
            reason: reason.to_string(),
            at,
        });

        let mut binding = self.binding.write();
        binding.active_provider = target.id.clone();
        binding.nameservers = target.endpoints.clone();
        binding.propagation_verified = false;

        info!(
            zone = %self.zone,
            provider = %target.id,
            reason,
            "nameserver delegation updated"
        );
        Ok(())
    }

    /// Confirm that resolvers observe the current delegation. With poll
    /// settings configured the oracle is retried until it confirms or the
    /// timeout elapses; otherwise it is asked once.
    pub async fn confirm_propagation(&self) -> Result<bool, RegistrarError> {
        let verified = match self.poll {
            None => self.registrar.verify_propagation(&self.zone).await?,
            Some(poll) => self.poll_propagation(poll).await?,
        };
        self.binding.write().propagation_verified = verified;
        if !verified {
            warn!(zone = %self.zone, "propagation not verified");
        }
        Ok(verified)
    }

    async fn poll_propagation(&self, poll: PropagationPoll) -> Result<bool, RegistrarError> {
        let deadline = tokio::time::Instant::now() + poll.timeout;
        loop {
            if self.registrar.verify_propagation(&self.zone).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() + poll.interval > deadline {
                return Ok(false);
            }
            tokio::time::sleep(poll.interval).await;
        }
    }
}
