//! Probe-result storage boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nsguard_proto::{ProbeResult, ProviderId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage connection error: {0}")]
    Connection(String),
    #[error("storage write failed: {0}")]
    Write(String),
    #[error("storage read failed: {0}")]
    Read(String),
}

/// Sink for raw probe results.
///
/// A write failure aborts the monitor's current sweep; results already
/// written stay written. Implementations must be safe under concurrent
/// callers; the monitor probes providers in parallel.
#[async_trait]
pub trait StorageSink: Send + Sync {
    /// Persist one probe result. Ownership of the result transfers to the
    /// sink.
    async fn save_result(&self, result: ProbeResult) -> Result<(), StorageError>;

    /// Results recorded at or after `since`, optionally restricted to one
    /// provider, in recording order.
    async fn get_results_since(
        &self,
        since: DateTime<Utc>,
        provider: Option<&ProviderId>,
    ) -> Result<Vec<ProbeResult>, StorageError>;
}
