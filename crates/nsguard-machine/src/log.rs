//! Append-only transition log with SHA-256 chain hashing.
//!
//! Every accepted transition is recorded here before the controller moves
//! on. Records are chained: each one's hash covers its content plus the
//! previous record's hash, so edits to a persisted log break the chain.

use chrono::{DateTime, Utc};
use nsguard_proto::{ControllerState, TransitionRecord};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct TransitionLog {
    records: Vec<TransitionRecord>,
    last_hash: String,
}

impl TransitionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted records, continuing the chain from the
    /// last one.
    pub fn from_records(records: Vec<TransitionRecord>) -> Self {
        let last_hash = records
            .last()
            .map(|r| r.record_hash.clone())
            .unwrap_or_default();
        Self { records, last_hash }
    }

    pub fn append(
        &mut self,
        from: ControllerState,
        to: ControllerState,
        at: DateTime<Utc>,
        reason: &str,
        operator: Option<String>,
    ) -> &TransitionRecord {
        let record_id = Uuid::new_v4();
        let record_hash = record_digest(
            record_id,
            from,
            to,
            at,
            reason,
            operator.as_deref(),
            &self.last_hash,
        );

        let record = TransitionRecord {
            record_id,
            from,
            to,
            at,
            reason: reason.to_string(),
            operator,
            previous_hash: std::mem::take(&mut self.last_hash),
            record_hash: record_hash.clone(),
        };

        self.last_hash = record_hash;
        self.records.push(record);
        self.records.last().expect("record just pushed")
    }

    pub fn records(&self) -> &[TransitionRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&TransitionRecord> {
        self.records.last()
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> &[TransitionRecord] {
        let start = self.records.len().saturating_sub(n);
        &self.records[start..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Walk the chain and recompute every hash. `false` means the log was
    /// tampered with or truncated in the middle.
    pub fn verify_chain(&self) -> bool {
        let mut prev_hash = String::new();
        for record in &self.records {
            if record.previous_hash != prev_hash {
                return false;
            }
            let expected = record_digest(
                record.record_id,
                record.from,
                record.to,
                record.at,
                &record.reason,
                record.operator.as_deref(),
                &record.previous_hash,
            );
            if record.record_hash != expected {
                return false;
            }
            prev_hash = record.record_hash.clone();
        }
        true
    }
}

fn record_digest(
    record_id: Uuid,
    from: ControllerState,
    to: ControllerState,
    at: DateTime<Utc>,
    reason: &str,
    operator: Option<&str>,
    previous_hash: &str,
) -> String {
    let canonical = serde_json::json!({
        "record_id": record_id,
        "from": from,
        "to": to,
        "at": at,
        "reason": reason,
        "operator": operator,
        "previous_hash": previous_hash,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, secs).unwrap()
    }

    #[test]
    fn appends_chain_records() {
        let mut log = TransitionLog::new();
        log.append(
            ControllerState::Healthy,
            ControllerState::Degraded,
            at(1),
            "score dropped",
            None,
        );
        log.append(
            ControllerState::Degraded,
            ControllerState::Healthy,
            at(2),
            "score recovered",
            None,
        );

        assert_eq!(log.len(), 2);
        assert!(log.records()[0].previous_hash.is_empty());
        assert_eq!(
            log.records()[1].previous_hash,
            log.records()[0].record_hash
        );
        assert!(log.verify_chain());
    }

    #[test]
    fn tampered_record_breaks_chain() {
        let mut log = TransitionLog::new();
        log.append(
            ControllerState::Healthy,
            ControllerState::Degraded,
            at(1),
            "score dropped",
            None,
        );
        log.append(
            ControllerState::Degraded,
            ControllerState::FailingOver,
            at(2),
            "score collapsed",
            None,
        );

        let mut records = log.records().to_vec();
        records[0].reason = "rewritten".to_string();
        assert!(!TransitionLog::from_records(records).verify_chain());
    }

    #[test]
    fn restored_log_continues_chain() {
        let mut log = TransitionLog::new();
        log.append(
            ControllerState::Healthy,
            ControllerState::Degraded,
            at(1),
            "score dropped",
            None,
        );

        let mut restored = TransitionLog::from_records(log.records().to_vec());
        restored.append(
            ControllerState::Degraded,
            ControllerState::Healthy,
            at(2),
            "score recovered",
            None,
        );
        assert!(restored.verify_chain());
    }

    #[test]
    fn recent_returns_tail() {
        let mut log = TransitionLog::new();
        for i in 0..5 {
            log.append(
                ControllerState::Healthy,
                ControllerState::Degraded,
                at(i),
                "tick",
                None,
            );
        }
        assert_eq!(log.recent(2).len(), 2);
        assert_eq!(log.recent(2)[1].at, at(4));
        assert_eq!(log.recent(10).len(), 5);
    }
}
