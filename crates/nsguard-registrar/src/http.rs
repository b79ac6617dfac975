//! HTTP registrar client.
//!
//! Speaks a small JSON API:
//!
//! ```text
//! GET  {base}/v1/domains/{domain}/nameservers   -> { "nameservers": [...] }
//! PUT  {base}/v1/domains/{domain}/nameservers   <- { "nameservers": [...], "reason": "..." }
//! GET  {base}/v1/domains/{domain}/propagation   -> { "verified": bool }
//! ```

use async_trait::async_trait;
use nsguard_core::{Registrar, RegistrarError};
use serde::Deserialize;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(15);

pub struct HttpRegistrar {
    client: reqwest::Client,
    base: String,
    token: String,
}

impl HttpRegistrar {
    pub fn new(base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into(),
            token: token.into(),
        }
    }

    fn url(&self, domain: &str, resource: &str) -> String {
        format!("{}/v1/domains/{domain}/{resource}", self.base)
    }
}

#[derive(Deserialize)]
struct NameserversBody {
    nameservers: Vec<String>,
}

#[derive(Deserialize)]
struct PropagationBody {
    verified: bool,
}

#[async_trait]
impl Registrar for HttpRegistrar {
    async fn get_nameservers(&self, domain: &str) -> Result<Vec<String>, RegistrarError> {
        let body: NameserversBody = self
            .client
            .get(self.url(domain, "nameservers"))
            .bearer_auth(&self.token)
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .map_err(|e| RegistrarError::Api(e.to_string()))?
            .error_for_status()
            .map_err(|e| RegistrarError::Api(e.to_string()))?
            .json()
            .await
            .map_err(|e| RegistrarError::Api(e.to_string()))?;
        Ok(body.nameservers)
    }

    async fn update_nameservers(
        &self,
        domain: &str,
        nameservers: &[String],
        reason: &str,
    ) -> Result<(), RegistrarError> {
        let response = self
            .client
            .put(self.url(domain, "nameservers"))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "nameservers": nameservers,
                "reason": reason,
            }))
            .timeout(WRITE_TIMEOUT)
            .send()
            .await
            .map_err(|e| RegistrarError::Api(e.to_string()))?;

        if response.status().is_client_error() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(RegistrarError::UpdateRejected(format!("{status}: {detail}")));
        }
        response
            .error_for_status()
            .map_err(|e| RegistrarError::Api(e.to_string()))?;
        Ok(())
    }

    async fn verify_propagation(&self, domain: &str) -> Result<bool, RegistrarError> {
        let body: PropagationBody = self
            .client
            .get(self.url(domain, "propagation"))
            .bearer_auth(&self.token)
            .timeout(READ_TIMEOUT)
            .send()
            .await
            .map_err(|e| RegistrarError::Api(e.to_string()))?
            .error_for_status()
            .map_err(|e| RegistrarError::Api(e.to_string()))?
            .json()
            .await
            .map_err(|e| RegistrarError::Api(e.to_string()))?;
        Ok(body.verified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_from_base_and_domain() {
        let registrar = HttpRegistrar::new("https://registrar.example", "token");
        assert_eq!(
            registrar.url("example.com", "nameservers"),
            "https://registrar.example/v1/domains/example.com/nameservers"
        );
        assert_eq!(
            registrar.url("example.com", "propagation"),
            "https://registrar.example/v1/domains/example.com/propagation"
        );
    }
}
