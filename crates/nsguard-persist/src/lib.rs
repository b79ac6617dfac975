//! JSON file-backed persistence.
//!
//! Two stores, both snapshot-on-write:
//! [`SnapshotStore`] keeps one serializable document per domain under
//! `{dir}/state/{domain}.json`; it holds the controller snapshot
//! (transition log, failover ledger, authorization flag).
//! [`FileResultStore`] is a [`StorageSink`] holding the trailing 24 hours
//! of probe results.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use nsguard_core::{StorageError, StorageSink};
use nsguard_proto::{ProbeResult, ProviderId};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ─── SnapshotStore ───────────────────────────────────────────────────────────

/// Persists a single JSON document, replacing it atomically on every save
/// (write to a temp file, then rename).
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(state_dir: &Path, domain: &str) -> Self {
        Self {
            path: state_dir.join("state").join(format!("{domain}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. `None` when the file is missing; a corrupt file
    /// is logged and treated as missing.
    pub fn load<T: DeserializeOwned>(&self) -> Option<T> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "corrupt snapshot, starting fresh");
                    None
                }
            },
            Err(_) => {
                debug!(path = %self.path.display(), "no snapshot on disk");
                None
            }
        }
    }

    /// Save the document, creating directories as needed.
    pub fn save<T: Serialize>(&self, value: &T) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(value).map_err(std::io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)
    }
}

// ─── FileResultStore ─────────────────────────────────────────────────────────

/// Probe-result sink backed by a JSON file, retaining the trailing 24
/// hours. Safe under concurrent probe tasks; every write snapshots to disk.
pub struct FileResultStore {
    store: SnapshotStore,
    results: Mutex<Vec<ProbeResult>>,
}

impl FileResultStore {
    pub fn new(state_dir: &Path) -> Self {
        let store = SnapshotStore::new(state_dir, "probe_results");
        let results = store.load::<Vec<ProbeResult>>().unwrap_or_default();
        debug!(count = results.len(), "loaded probe results from disk");
        Self {
            store,
            results: Mutex::new(results),
        }
    }

    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }
}

#[async_trait]
impl StorageSink for FileResultStore {
    async fn save_result(&self, result: ProbeResult) -> Result<(), StorageError> {
        let snapshot = {
            let mut results = self.results.lock();
            let cutoff = result.checked_at - Duration::hours(24);
            results.retain(|r| r.checked_at >= cutoff);
            results.push(result);
            results.clone()
        };
        self.store
            .save(&snapshot)
            .map_err(|e| StorageError::Write(e.to_string()))
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
