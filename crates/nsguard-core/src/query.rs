//! DNS query primitive used by the probe monitor.

use async_trait::async_trait;

/// Outcome of a single DNS probe query. Probe failures are data, not
/// errors: a timeout or SERVFAIL becomes `success == false` with a message,
/// and the sweep carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

/// Sends one DNS query to a specific nameserver host and reports whether a
/// usable answer came back.
///
/// Implementations must be safe to call from multiple tasks concurrently.
#[async_trait]
pub trait DnsQuery: Send + Sync {
    async fn query(&self, nameserver: &str, domain: &str) -> QueryOutcome;
}
