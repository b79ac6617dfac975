//! Registrar boundary.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrarError {
    #[error("registrar request failed: {0}")]
    Api(String),
    #[error("registrar rejected nameserver update: {0}")]
    UpdateRejected(String),
    #[error("propagation not verified for {domain}")]
    PropagationUnverified { domain: String },
}

/// The registrar interface for a zone's authoritative NS delegation.
///
/// `update_nameservers` is assumed atomic at the registrar: either the full
/// NS set is replaced or nothing changes.
#[async_trait]
pub trait Registrar: Send + Sync {
    async fn get_nameservers(&self, domain: &str) -> Result<Vec<String>, RegistrarError>;

    async fn update_nameservers(
        &self,
        domain: &str,
        nameservers: &[String],
        reason: &str,
    ) -> Result<(), RegistrarError>;

    /// Whether resolvers observe the most recently written NS set.
    async fn verify_propagation(&self, domain: &str) -> Result<bool, RegistrarError>;
}
