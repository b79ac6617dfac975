//! In-process metrics registry for probe observations.
//!
//! Implements [`MetricsSink`] with labeled counters, a duration histogram,
//! and a per-provider health gauge, and renders everything in Prometheus
//! text format:
//!
//! - `dns_query_duration_seconds` (histogram; labels `provider`, `nameserver`)
//! - `dns_query_success_total` / `dns_query_failure_total` (counters)
//! - `dns_provider_health_score` (gauge, 0–100)

#![forbid(unsafe_code)]

use nsguard_core::MetricsSink;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Histogram bucket upper bounds, in seconds. A probe that takes longer
/// than the last bound only lands in `+Inf`.
const BUCKETS: [f64; 11] = [
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
];

#[derive(Debug, Clone)]
struct Histogram {
    /// Cumulative counts per bucket, aligned with [`BUCKETS`].
    buckets: [u64; BUCKETS.len()],
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: [0; BUCKETS.len()],
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        for (i, bound) in BUCKETS.iter().enumerate() {
            if value <= *bound {
                self.buckets[i] += 1;
            }
        }
        self.sum += value;
        self.count += 1;
    }
}

type Labels = (String, String);

/// Thread-safe registry shared between the monitor and the status surface.
#[derive(Default)]
pub struct ProbeMetrics {
    durations: RwLock<BTreeMap<Labels, Histogram>>,
    successes: RwLock<BTreeMap<Labels, u64>>,
    failures: RwLock<BTreeMap<Labels, u64>>,
    scores: RwLock<BTreeMap<String, f64>>,
}

impl ProbeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success_total(&self, provider: &str, endpoint: &str) -> u64 {
        self.successes
            .read()
            .get(&(provider.to_string(), endpoint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn failure_total(&self, provider: &str, endpoint: &str) -> u64 {
        self.failures
            .read()
            .get(&(provider.to_string(), endpoint.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn health_score(&self, provider: &str) -> Option<f64> {
        self.scores.read().get(provider).copied()
    }

    /// Render every metric in Prometheus text format. Series are emitted in
    /// label order, so output is stable across calls.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP dns_query_duration_seconds Duration of DNS probe queries\n");
        out.push_str("# TYPE dns_query_duration_seconds histogram\n");
        for ((provider, nameserver), histogram) in self.durations.read().iter() {
            let labels = format!(
                "provider=\"{}\",nameserver=\"{}\"",
                escape(provider),
                escape(nameserver)
            );
            for (i, bound) in BUCKETS.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "dns_query_duration_seconds_bucket{{{labels},le=\"{bound}\"}} {}",
                    histogram.buckets[i]
                );
            }
            let _ = writeln!(
                out,
                "dns_query_duration_seconds_bucket{{{labels},le=\"+Inf\"}} {}",
                histogram.count
            );
            let _ = writeln!(
                out,
                "dns_query_duration_seconds_sum{{{labels}}} {}",
                histogram.sum
            );
            let _ = writeln!(
                out,
                "dns_query_duration_seconds_count{{{labels}}} {}",
                histogram.count
            );
        }
        out.push('\n');

        render_counter(
            &mut out,
            "dns_query_success_total",
            "Total successful DNS probe queries",
            &self.successes.read(),
        );
        render_counter(
            &mut out,
            "dns_query_failure_total",
            "Total failed DNS probe queries",
            &self.failures.read(),
        );

        out.push_str("# HELP dns_provider_health_score Composite provider health score\n");
        out.push_str("# TYPE dns_provider_health_score gauge\n");
        for (provider, score) in self.scores.read().iter() {
            let _ = writeln!(
                out,
                "dns_provider_health_score{{provider=\"{}\"}} {score}",
                escape(provider)
            );
        }

        out
    }
}

fn render_counter(out: &mut String, name: &str, help: &str, series: &BTreeMap<Labels, u64>) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} counter");
    for ((provider, nameserver), value) in series {
        let _ = writeln!(
            out,
            "{name}{{provider=\"{}\",nameserver=\"{}\"}} {value}",
            escape(provider),
            escape(nameserver)
        );
    }
    out.push('\n');
}

fn escape(label: &str) -> String {
    label
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

impl MetricsSink for ProbeMetrics {
    fn observe_duration(&self, provider: &str, endpoint: &str, seconds: f64) {
        self.durations
            .write()
            .entry((provider.to_string(), endpoint.to_string()))
            .or_insert_with(Histogram::new)
            .observe(seconds);
    }

    fn inc_success(&self, provider: &str, endpoint: &str) {
        *self
            .successes
            .write()
            .entry((provider.to_string(), endpoint.to_string()))
            .or_default() += 1;
    }

    fn inc_failure(&self, provider: &str, endpoint: &str) {
        *self
            .failures
            .write()
            .entry((provider.to_string(), endpoint.to_string()))
            .or_default() += 1;
    }

    fn set_health_score(&self, provider: &str, score: f64) {
        self.scores.write().insert(provider.to_string(), score);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_pair() {
        let metrics = ProbeMetrics::new();
        metrics.inc_success("cloudflare", "ns1.cloudflare.net");
        metrics.inc_success("cloudflare", "ns1.cloudflare.net");
        metrics.inc_failure("cloudflare", "ns2.cloudflare.net");

        assert_eq!(metrics.success_total("cloudflare", "ns1.cloudflare.net"), 2);
        assert_eq!(metrics.failure_total("cloudflare", "ns2.cloudflare.net"), 1);
        assert_eq!(metrics.success_total("route53", "ns-1.awsdns.org"), 0);
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let metrics = ProbeMetrics::new();
        metrics.observe_duration("cloudflare", "ns1.cloudflare.net", 0.002);
        metrics.observe_duration("cloudflare", "ns1.cloudflare.net", 0.2);
        metrics.observe_duration("cloudflare", "ns1.cloudflare.net", 9.0);

        let rendered = metrics.render();
        assert!(rendered.contains(
            "dns_query_duration_seconds_bucket{provider=\"cloudflare\",nameserver=\"ns1.cloudflare.net\",le=\"0.0025\"} 1"
        ));
        assert!(rendered.contains(
            "dns_query_duration_seconds_bucket{provider=\"cloudflare\",nameserver=\"ns1.cloudflare.net\",le=\"0.25\"} 2"
        ));
        // 9 s only counts toward +Inf.
        assert!(rendered.contains(
            "dns_query_duration_seconds_bucket{provider=\"cloudflare\",nameserver=\"ns1.cloudflare.net\",le=\"+Inf\"} 3"
        ));
        assert!(rendered.contains(
            "dns_query_duration_seconds_count{provider=\"cloudflare\",nameserver=\"ns1.cloudflare.net\"} 3"
        ));
    }

    #[test]
    fn gauge_overwrites_previous_value() {
        let metrics = ProbeMetrics::new();
        metrics.set_health_score("cloudflare", 92.5);
        metrics.set_health_score("cloudflare", 40.0);
        assert_eq!(metrics.health_score("cloudflare"), Some(40.0));
        assert!(
            metrics
                .render()
                .contains("dns_provider_health_score{provider=\"cloudflare\"} 40")
        );
    }

    #[test]
    fn render_carries_help_and_type_lines() {
        let metrics = ProbeMetrics::new();
        metrics.inc_success("cloudflare", "ns1.cloudflare.net");
        let rendered = metrics.render();
        assert!(rendered.contains("# HELP dns_query_success_total"));
        assert!(rendered.contains("# TYPE dns_query_success_total counter"));
        assert!(rendered.contains("# TYPE dns_query_duration_seconds histogram"));
        assert!(rendered.contains("# TYPE dns_provider_health_score gauge"));
    }
}
