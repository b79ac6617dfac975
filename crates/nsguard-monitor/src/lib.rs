//! DNS probe monitor.
//!
//! On each tick the monitor probes every endpoint of every configured
//! provider with the zone's canary record, hands raw results to the storage
//! sink, publishes metrics, and scores each provider's sweep. Providers are
//! probed concurrently; a provider's endpoints are probed sequentially in
//! configured order, which keeps per-provider results totally ordered.

#![forbid(unsafe_code)]

pub mod score;

pub use score::score_results;

use futures_util::future::try_join_all;
use nsguard_core::{Clock, DnsQuery, MetricsSink, StorageError, StorageSink};
use nsguard_proto::{ProbeResult, Provider, ProviderId, ProviderScore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Label of the well-known canary record probed on every endpoint.
pub fn canary_domain(zone: &str) -> String {
    format!("_health-check.{zone}")
}

#[derive(Debug, Error)]
pub enum MonitorError {
    /// Persisting a probe result failed; the sweep was aborted. Results
    /// written before the failure remain in the sink.
    #[error("probe sweep aborted: {0}")]
    Storage(#[from] StorageError),
}

/// Event published by [`Monitor::run_forever`] after each sweep.
#[derive(Debug, Clone)]
pub enum SweepEvent {
    Completed {
        scores: HashMap<ProviderId, ProviderScore>,
        probes: usize,
    },
    Failed {
        error: String,
    },
}

pub struct Monitor {
    providers: Vec<Provider>,
    canary: String,
    origin: String,
    query: Arc<dyn DnsQuery>,
    storage: Arc<dyn StorageSink>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    shutdown_grace: Duration,
}

impl Monitor {
    pub fn new(
        providers: Vec<Provider>,
        zone: &str,
        origin: impl Into<String>,
        query: Arc<dyn DnsQuery>,
        storage: Arc<dyn StorageSink>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            providers,
            canary: canary_domain(zone),
            origin: origin.into(),
            query,
            storage,
            metrics,
            clock,
            shutdown_grace: Duration::from_secs(10),
        }
    }

    /// How long an in-flight sweep may keep draining after shutdown is
    /// requested. Its output is discarded either way.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Execute one probe sweep across all providers.
    ///
    /// Fails only when the storage sink fails; a single probe timeout is
    /// recorded as an unsuccessful [`ProbeResult`] and does not abort the
    /// sweep.
    pub async fn run_once(&self) -> Result<HashMap<ProviderId, Vec<ProbeResult>>, MonitorError> {
        let sweeps = self.providers.iter().map(|p| self.probe_provider(p));
        Ok(try_join_all(sweeps).await?.into_iter().collect())
    }

    /// Score every provider's slice of a sweep.
    pub fn score_sweep(
        &self,
        results: &HashMap<ProviderId, Vec<ProbeResult>>,
    ) -> HashMap<ProviderId, ProviderScore> {
        results
            .iter()
            .map(|(id, window)| (id.clone(), score_results(id, window)))
            .collect()
    }

    async fn probe_provider(
        &self,
        provider: &Provider,
    ) -> Result<(ProviderId, Vec<ProbeResult>), MonitorError> {
        let mut results = Vec::with_capacity(provider.endpoints.len());

        for endpoint in &provider.endpoints {
            let result = self.probe_endpoint(provider, endpoint).await;
            self.storage.save_result(result.clone()).await?;

            self.metrics.observe_duration(
                provider.id.as_str(),
                endpoint,
                result.elapsed_ms as f64 / 1000.0,
            );
            if result.success {
                self.metrics.inc_success(provider.id.as_str(), endpoint);
            } else {
                self.metrics.inc_failure(provider.id.as_str(), endpoint);
            }

            results.push(result);
        }

        let score = score_results(&provider.id, &results);
        self.metrics
            .set_health_score(provider.id.as_str(), score.composite);
        debug!(
            provider = %provider.id,
            score = score.composite,
            samples = score.samples,
            "provider sweep scored"
        );

        Ok((provider.id.clone(), results))
    }

    async fn probe_endpoint(&self, provider: &Provider, endpoint: &str) -> ProbeResult {
        let started = self.clock.now();
        let outcome = self.query.query(endpoint, &self.canary).await;
        let elapsed_ms = (self.clock.now() - started).num_milliseconds().max(0) as u64;

        let error = if outcome.success {
            None
        } else {
            // A failed query must always carry a message, even when the
            // primitive reported none.
            Some(outcome.error.unwrap_or_else(|| "unknown".to_string()))
        };

        ProbeResult {
            provider: provider.id.clone(),
            endpoint: endpoint.to_string(),
            query_domain: self.canary.clone(),
            elapsed_ms,
            success: outcome.success,
            error,
            origin: self.origin.clone(),
            checked_at: started,
        }
    }

    /// Cooperative probe loop: one sweep per `interval`, outcomes published
    /// on `events`.
    ///
    /// Storage failures are published as [`SweepEvent::Failed`] and the loop
    /// carries on; use [`Monitor::run_once`] when the error must propagate.
    /// On shutdown an in-flight sweep is given `shutdown_grace` to drain
    /// and its partial output is discarded. No partial scores are ever
    /// published.
    pub async fn run_forever(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
        events: mpsc::Sender<SweepEvent>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("monitor loop stopping");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let sweep = self.run_once();
            tokio::pin!(sweep);

            tokio::select! {
                outcome = &mut sweep => {
                    let event = match outcome {
                        Ok(results) => {
                            let probes = results.values().map(Vec::len).sum();
                            SweepEvent::Completed {
                                scores: self.score_sweep(&results),
                                probes,
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "probe sweep failed");
                            SweepEvent::Failed {
                                error: e.to_string(),
                            }
                        }
                    };
                    if events.send(event).await.is_err() {
                        info!("sweep consumer gone, monitor loop stopping");
                        return;
                    }
                }
                _ = shutdown.changed() => {
                    let _ = tokio::time::timeout(self.shutdown_grace, &mut sweep).await;
                    info!("monitor loop stopped, in-flight sweep discarded");
                    return;
                }
            }
        }
    }
}
