//! Provider health scoring.
//!
//! Pure function from a window of probe results to a composite score on the
//! 0–100 scale:
//!
//! ```text
//! score = 60·success_rate + 30·latency_score + 10·consistency_score
//! ```
//!
//! `latency_score` is piecewise-linear on the mean elapsed milliseconds:
//! 1.0 below 50 ms, 0.0 at 1000 ms and above, linear in between.
//! `consistency_score` rewards agreement: 1.0 when every probe in the
//! window had the same outcome.

use nsguard_proto::{ProbeResult, ProviderId, ProviderScore};

const SUCCESS_WEIGHT: f64 = 60.0;
const LATENCY_WEIGHT: f64 = 30.0;
const CONSISTENCY_WEIGHT: f64 = 10.0;

const LATENCY_FLOOR_MS: f64 = 50.0;
const LATENCY_CEILING_MS: f64 = 1000.0;

/// Score one provider's window of probe results.
///
/// An empty window scores 0 with zeroed components: no data is treated as
/// no evidence of health.
pub fn score_results(provider: &ProviderId, results: &[ProbeResult]) -> ProviderScore {
    if results.is_empty() {
        return ProviderScore {
            provider: provider.clone(),
            composite: 0.0,
            success_rate: 0.0,
            latency_score: 0.0,
            consistency_score: 0.0,
            samples: 0,
        };
    }

    let total = results.len() as f64;
    let successes = results.iter().filter(|r| r.success).count() as f64;
    let failures = total - successes;

    let success_rate = successes / total;
    let mean_ms = results.iter().map(|r| r.elapsed_ms as f64).sum::<f64>() / total;
    let latency_score = latency_score(mean_ms);
    let consistency_score = successes.max(failures) / total;

    let composite = (SUCCESS_WEIGHT * success_rate
        + LATENCY_WEIGHT * latency_score
        + CONSISTENCY_WEIGHT * consistency_score)
        .clamp(0.0, 100.0);

    ProviderScore {
        provider: provider.clone(),
        composite,
        success_rate,
        latency_score,
        consistency_score,
        samples: results.len(),
    }
}

fn latency_score(mean_ms: f64) -> f64 {
    if mean_ms < LATENCY_FLOOR_MS {
        1.0
    } else if mean_ms >= LATENCY_CEILING_MS {
        0.0
    } else {
        1.0 - (mean_ms - LATENCY_FLOOR_MS) / (LATENCY_CEILING_MS - LATENCY_FLOOR_MS)
    }
}
