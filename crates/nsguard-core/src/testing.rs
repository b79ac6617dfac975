//! Scripted implementations of the injected interfaces.
//!
//! Shared by unit tests across the workspace and by the integration suite.
//! Every double is deterministic: time only moves when a test calls
//! [`FakeClock::advance`], and query/registrar behavior is whatever the
//! test scripted.

use crate::clock::Clock;
use crate::metrics::MetricsSink;
use crate::query::{DnsQuery, QueryOutcome};
use crate::registrar::{Registrar, RegistrarError};
use crate::storage::{StorageError, StorageSink};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use nsguard_proto::{ProbeResult, ProviderId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

// ─── FakeClock ───────────────────────────────────────────────────────────────

/// Virtual clock. Starts at a fixed instant and only moves on `advance`.
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    /// Clock starting at an arbitrary fixed instant.
    pub fn new() -> Arc<Self> {
        Self::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap())
    }

    pub fn at(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ─── ScriptedDnsQuery ────────────────────────────────────────────────────────

/// DNS query double with per-endpoint scripted outcomes.
///
/// Optionally advances a [`FakeClock`] on every query so latency-dependent
/// scoring can be exercised without real sleeps.
pub struct ScriptedDnsQuery {
    outcomes: Mutex<HashMap<String, QueryOutcome>>,
    default: QueryOutcome,
    latency: Mutex<Option<(Arc<FakeClock>, Duration)>>,
}

impl ScriptedDnsQuery {
    /// All endpoints succeed unless scripted otherwise.
    pub fn all_ok() -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(HashMap::new()),
            default: QueryOutcome::ok(),
            latency: Mutex::new(None),
        })
    }

    /// All endpoints fail with `message` unless scripted otherwise.
    pub fn all_failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(HashMap::new()),
            default: QueryOutcome::failed(message),
            latency: Mutex::new(None),
        })
    }

    pub fn set_outcome(&self, endpoint: &str, outcome: QueryOutcome) {
        self.outcomes.lock().insert(endpoint.to_string(), outcome);
    }

    /// Advance `clock` by `per_query` on every query, simulating probe
    /// latency under a virtual clock.
    pub fn set_latency(&self, clock: Arc<FakeClock>, per_query: Duration) {
        *self.latency.lock() = Some((clock, per_query));
    }
}

#[async_trait]
impl DnsQuery for ScriptedDnsQuery {
    async fn query(&self, nameserver: &str, _domain: &str) -> QueryOutcome {
        if let Some((clock, per_query)) = self.latency.lock().as_ref() {
            clock.advance(*per_query);
        }
        self.outcomes
            .lock()
            .get(nameserver)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

// ─── MemoryStorage ───────────────────────────────────────────────────────────

/// In-memory probe-result store with an injectable write failure.
pub struct MemoryStorage {
    results: Mutex<Vec<ProbeResult>>,
    fail_writes: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(Vec::new()),
            fail_writes: Mutex::new(None),
        })
    }

    /// Make every subsequent `save_result` fail with a connection error.
    pub fn fail_writes(&self, message: &str) {
        *self.fail_writes.lock() = Some(message.to_string());
    }

    pub fn saved(&self) -> Vec<ProbeResult> {
        self.results.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }
}

#[async_trait]
impl StorageSink for MemoryStorage {
    async fn save_result(&self, result: ProbeResult) -> Result<(), StorageError> {
        if let Some(message) = self.fail_writes.lock().clone() {
            return Err(StorageError::Connection(message));
        }
        self.results.lock().push(result);
        Ok(())
    }

    async fn get_results_since(
        &self,
        since: DateTime<Utc>,
        provider: Option<&ProviderId>,
    ) -> Result<Vec<ProbeResult>, StorageError> {
        Ok(self
            .results
            .lock()
            .iter()
            .filter(|r| r.checked_at >= since)
            .filter(|r| provider.is_none_or(|p| &r.provider == p))
            .cloned()
            .collect())
    }
}

// ─── RecordingMetrics ────────────────────────────────────────────────────────

/// Metrics sink that records every observation for assertions.
#[derive(Default)]
pub struct RecordingMetrics {
    pub durations: Mutex<Vec<(String, String, f64)>>,
    pub successes: Mutex<HashMap<(String, String), u64>>,
    pub failures: Mutex<HashMap<(String, String), u64>>,
    pub scores: Mutex<HashMap<String, f64>>,
}

impl RecordingMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn success_count(&self, provider: &str, endpoint: &str) -> u64 {
        self.successes
            .lock()
            .get(&(provider.to_string(), endpoint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn failure_count(&self, provider: &str, endpoint: &str) -> u64 {
        self.failures
            .lock()
            .get(&(provider.to_string(), endpoint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn last_score(&self, provider: &str) -> Option<f64> {
        self.scores.lock().get(provider).copied()
    }
}

impl MetricsSink for RecordingMetrics {
    fn observe_duration(&self, provider: &str, endpoint: &str, seconds: f64) {
        self.durations
            .lock()
            .push((provider.to_string(), endpoint.to_string(), seconds));
    }

    fn inc_success(&self, provider: &str, endpoint: &str) {
        *self
            .successes
            .lock()
            .entry((provider.to_string(), endpoint.to_string()))
            .or_default() += 1;
    }

    fn inc_failure(&self, provider: &str, endpoint: &str) {
        *self
            .failures
            .lock()
            .entry((provider.to_string(), endpoint.to_string()))
            .or_default() += 1;
    }

    fn set_health_score(&self, provider: &str, score: f64) {
        self.scores.lock().insert(provider.to_string(), score);
    }
}

// ─── MockRegistrar ───────────────────────────────────────────────────────────

/// One recorded nameserver update on the mock registrar.
#[derive(Debug, Clone)]
pub struct RecordedUpdate {
    pub domain: String,
    pub nameservers: Vec<String>,
    pub reason: String,
}

/// Registrar double holding the delegated NS set in memory.
pub struct MockRegistrar {
    nameservers: Mutex<Vec<String>>,
    updates: Mutex<Vec<RecordedUpdate>>,
    verify_result: Mutex<bool>,
    fail_update: Mutex<Option<String>>,
}

impl MockRegistrar {
    pub fn new(initial_ns: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            nameservers: Mutex::new(initial_ns),
            updates: Mutex::new(Vec::new()),
            verify_result: Mutex::new(true),
            fail_update: Mutex::new(None),
        })
    }

    /// Script the propagation oracle.
    pub fn set_verify_result(&self, verified: bool) {
        *self.verify_result.lock() = verified;
    }

    /// Make every subsequent update fail.
    pub fn fail_updates(&self, message: &str) {
        *self.fail_update.lock() = Some(message.to_string());
    }

    /// Let updates succeed again.
    pub fn clear_failures(&self) {
        *self.fail_update.lock() = None;
    }

    pub fn current_nameservers(&self) -> Vec<String> {
        self.nameservers.lock().clone()
    }

    pub fn updates(&self) -> Vec<RecordedUpdate> {
        self.updates.lock().clone()
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().len()
    }
}

#[async_trait]
impl Registrar for MockRegistrar {
    async fn get_nameservers(&self, _domain: &str) -> Result<Vec<String>, RegistrarError> {
        Ok(self.nameservers.lock().clone())
    }

    async fn update_nameservers(
        &self,
        domain: &str,
        nameservers: &[String],
        reason: &str,
    ) -> Result<(), RegistrarError> {
        if let Some(message) = self.fail_update.lock().clone() {
            return Err(RegistrarError::Api(message));
        }
        *self.nameservers.lock() = nameservers.to_vec();
        self.updates.lock().push(RecordedUpdate {
            domain: domain.to_string(),
            nameservers: nameservers.to_vec(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn verify_propagation(&self, _domain: &str) -> Result<bool, RegistrarError> {
        Ok(*self.verify_result.lock())
    }
}
