//! Controller configuration.

use anyhow::{Context, bail};
use nsguard_machine::FailoverConfig;
use nsguard_proto::{Provider, ProviderId, ProviderRole};
use nsguard_registrar::{NsPattern, default_patterns};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    pub display_name: String,
    /// "primary" or "secondary"
    pub role: String,
    /// The provider's nameserver hostnames, probe targets and NS set alike.
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NsPatternEntry {
    pub substring: String,
    pub provider: String,
}

/// Configuration for one nsguard controller instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Zone under control (e.g. "example.com").
    pub zone: String,

    /// Exactly one primary and one secondary provider.
    pub providers: Vec<ProviderEntry>,

    /// "production" or "simplified".
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Require the single-use authorization flag before any failover.
    #[serde(default)]
    pub require_manual_auth: bool,

    /// Seconds between probe sweeps.
    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    /// Per-probe UDP timeout in milliseconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Directory for persisted state (snapshots, probe results, metrics).
    pub state_path: PathBuf,

    /// Registrar API base URL.
    pub registrar_api: String,

    /// Environment variable holding the registrar API token.
    #[serde(default = "default_token_env")]
    pub registrar_token_env: String,

    /// Poll the propagation oracle instead of asking once.
    #[serde(default)]
    pub propagation_poll: bool,

    /// NS hostname substrings to provider names; defaults cover the usual
    /// vendors when empty.
    #[serde(default)]
    pub ns_patterns: Vec<NsPatternEntry>,

    /// Check-origin label stamped on probe results; defaults to the local
    /// hostname.
    #[serde(default)]
    pub origin: Option<String>,

    /// Minutes of stored probe results the status command scores over.
    #[serde(default = "default_status_window")]
    pub status_window_mins: i64,
}

fn default_profile() -> String {
    "production".to_string()
}

fn default_probe_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    3000
}

fn default_token_env() -> String {
    "NSGUARD_REGISTRAR_TOKEN".to_string()
}

fn default_status_window() -> i64 {
    15
}

impl ControllerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.zone.is_empty() {
            bail!("config: zone must not be empty");
        }
        self.providers()?;
        self.failover_config()?;
        Ok(())
    }

    /// The (primary, secondary) provider pair.
    pub fn providers(&self) -> anyhow::Result<(Provider, Provider)> {
        let mut primary = None;
        let mut secondary = None;
        for entry in &self.providers {
            let provider = entry.to_provider()?;
            match provider.role {
                ProviderRole::Primary if primary.is_some() => {
                    bail!("config: more than one primary provider")
                }
                ProviderRole::Primary => primary = Some(provider),
                ProviderRole::Secondary if secondary.is_some() => {
                    bail!("config: more than one secondary provider")
                }
                ProviderRole::Secondary => secondary = Some(provider),
            }
        }
        match (primary, secondary) {
            (Some(p), Some(s)) => Ok((p, s)),
            _ => bail!("config: exactly one primary and one secondary provider required"),
        }
    }

    pub fn failover_config(&self) -> anyhow::Result<FailoverConfig> {
        let base = match self.profile.as_str() {
            "production" => FailoverConfig::production(),
            "simplified" => FailoverConfig::simplified(),
            other => bail!("config: unknown profile '{other}' (expected production or simplified)"),
        };
        Ok(base.with_manual_auth(self.require_manual_auth))
    }

    pub fn ns_patterns(&self) -> Vec<NsPattern> {
        if self.ns_patterns.is_empty() {
            default_patterns()
        } else {
            self.ns_patterns
                .iter()
                .map(|p| NsPattern::new(&p.substring, &p.provider))
                .collect()
        }
    }

    pub fn origin(&self) -> String {
        self.origin.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "nsguard".to_string())
        })
    }

    pub fn registrar_token(&self) -> anyhow::Result<String> {
        std::env::var(&self.registrar_token_env).with_context(|| {
            format!(
                "registrar token not found in ${}",
                self.registrar_token_env
            )
        })
    }

    /// A filled-in sample config for `init-config`.
    pub fn sample() -> Self {
        Self {
            zone: "example.com".to_string(),
            providers: vec![
                ProviderEntry {
                    id: "cloudflare".to_string(),
                    display_name: "Cloudflare".to_string(),
                    role: "primary".to_string(),
                    endpoints: vec![
                        "ns1.cloudflare.net".to_string(),
                        "ns2.cloudflare.net".to_string(),
                    ],
                },
                ProviderEntry {
                    id: "route53".to_string(),
                    display_name: "AWS Route 53".to_string(),
                    role: "secondary".to_string(),
                    endpoints: vec![
                        "ns-1.awsdns-00.org".to_string(),
                        "ns-2.awsdns-01.net".to_string(),
                    ],
                },
            ],
            profile: default_profile(),
            require_manual_auth: false,
            probe_interval_secs: default_probe_interval(),
            probe_timeout_ms: default_probe_timeout(),
            state_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/var/lib"))
                .join(".nsguard"),
            registrar_api: "https://registrar.example.net".to_string(),
            registrar_token_env: default_token_env(),
            propagation_poll: false,
            ns_patterns: Vec::new(),
            origin: None,
            status_window_mins: default_status_window(),
        }
    }
}

impl ProviderEntry {
    fn to_provider(&self) -> anyhow::Result<Provider> {
        let role = match self.role.as_str() {
            "primary" => ProviderRole::Primary,
            "secondary" => ProviderRole::Secondary,
            other => bail!(
                "config: provider '{}' has unknown role '{other}'",
                self.id
            ),
        };
        if self.endpoints.is_empty() {
            bail!("config: provider '{}' has no endpoints", self.id);
        }
        Ok(Provider {
            id: ProviderId::new(self.id.clone()),
            display_name: self.display_name.clone(),
            role,
            endpoints: self.endpoints.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_round_trips_and_validates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        ControllerConfig::sample().save(&path).expect("save");

        let loaded = ControllerConfig::load(&path).expect("load");
        let (primary, secondary) = loaded.providers().expect("providers");
        assert_eq!(primary.id.as_str(), "cloudflare");
        assert_eq!(secondary.id.as_str(), "route53");
    }

    #[test]
    fn duplicate_primary_is_rejected() {
        let mut config = ControllerConfig::sample();
        config.providers[1].role = "primary".to_string();
        assert!(config.providers().is_err());
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let mut config = ControllerConfig::sample();
        config.profile = "aggressive".to_string();
        assert!(config.failover_config().is_err());
    }

    #[test]
    fn default_patterns_used_when_table_empty() {
        let config = ControllerConfig::sample();
        let patterns = config.ns_patterns();
        assert!(patterns.iter().any(|p| p.provider == "cloudflare"));
        assert!(patterns.iter().any(|p| p.provider == "route53"));
    }
}
