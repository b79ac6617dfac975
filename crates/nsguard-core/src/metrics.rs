//! Metrics boundary.

/// Sink for probe and health metrics. Non-failing from the caller's point
/// of view: a metrics backlog must never abort a probe sweep.
pub trait MetricsSink: Send + Sync {
    /// Record the duration of one probe query, in seconds.
    fn observe_duration(&self, provider: &str, endpoint: &str, seconds: f64);

    fn inc_success(&self, provider: &str, endpoint: &str);

    fn inc_failure(&self, provider: &str, endpoint: &str);

    /// Publish a provider's composite health score (0–100).
    fn set_health_score(&self, provider: &str, score: f64);
}

/// Discards everything. Used where metrics are not wired up.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullMetrics;

impl MetricsSink for NullMetrics {
    fn observe_duration(&self, _provider: &str, _endpoint: &str, _seconds: f64) {}
    fn inc_success(&self, _provider: &str, _endpoint: &str) {}
    fn inc_failure(&self, _provider: &str, _endpoint: &str) {}
    fn set_health_score(&self, _provider: &str, _score: f64) {}
}
