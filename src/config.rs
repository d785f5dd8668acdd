//! Configuration file loading and validation.
//!
//! The file is TOML with three sections: `[integration]` (the SmartCasa
//! server credentials collected by the setup form), `[hub]` (how to reach
//! Home Assistant) and an optional `[bridge]` table of job options.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{BridgeError, Result};
use crate::model::DomainFilter;

/// Fixed command poll period.
pub const POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Per-request timeout for calls to the SmartCasa server.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Path appended to `server_url`.
pub const BRIDGE_ENDPOINT: &str = "api_bridge.php";

/// Credentials for one configured integration instance. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IntegrationConfig {
    /// Display name of the home.
    #[serde(rename = "nome_casa")]
    pub name: String,
    pub server_url: String,
    pub token: String,
    pub api_key: String,
}

impl IntegrationConfig {
    /// `{server_url}/api_bridge.php`, tolerating a trailing slash.
    pub fn endpoint_url(&self) -> String {
        format!("{}/{}", self.server_url.trim_end_matches('/'), BRIDGE_ENDPOINT)
    }
}

/// Home Assistant connection settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubConfig {
    pub url: String,
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum DomainsSetting {
    Keyword(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawBridgeOptions {
    domains: Option<DomainsSetting>,
    forward_attributes: Option<bool>,
}

/// Tunables for the three jobs.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeOptions {
    pub domains: DomainFilter,
    pub forward_attributes: bool,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            domains: DomainFilter::default(),
            forward_attributes: true,
            poll_interval: POLL_INTERVAL,
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl TryFrom<RawBridgeOptions> for BridgeOptions {
    type Error = BridgeError;

    fn try_from(raw: RawBridgeOptions) -> Result<Self> {
        let domains = match raw.domains {
            None => DomainFilter::default(),
            Some(DomainsSetting::Keyword(k)) if k.eq_ignore_ascii_case("all") => DomainFilter::All,
            Some(DomainsSetting::Keyword(k)) => {
                return Err(BridgeError::Config(format!(
                    "bridge.domains must be \"all\" or a list, got \"{k}\""
                )))
            }
            Some(DomainsSetting::List(list)) => DomainFilter::only(list),
        };
        Ok(Self {
            domains,
            forward_attributes: raw.forward_attributes.unwrap_or(true),
            ..Self::default()
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    integration: IntegrationConfig,
    hub: HubConfig,
    #[serde(default)]
    bridge: RawBridgeOptions,
}

/// Everything the binary needs to start one instance.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub integration: IntegrationConfig,
    pub hub: HubConfig,
    pub options: BridgeOptions,
}

impl AppConfig {
    /// Read, parse and validate a config file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut cfg = Self::from_toml(&text)?;
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse without validating.
    pub fn from_toml(text: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        Ok(Self {
            integration: raw.integration,
            hub: raw.hub,
            options: raw.bridge.try_into()?,
        })
    }

    /// Replace secrets with `SMARTCASA_TOKEN`, `SMARTCASA_API_KEY` and
    /// `HASS_TOKEN` when the lookup yields a value.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SMARTCASA_TOKEN") {
            self.integration.token = v;
        }
        if let Some(v) = lookup("SMARTCASA_API_KEY") {
            self.integration.api_key = v;
        }
        if let Some(v) = lookup("HASS_TOKEN") {
            self.hub.access_token = v;
        }
    }

    /// Required-field presence only; no connectivity check.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("integration.nome_casa", &self.integration.name),
            ("integration.server_url", &self.integration.server_url),
            ("integration.token", &self.integration.token),
            ("integration.api_key", &self.integration.api_key),
            ("hub.url", &self.hub.url),
            ("hub.access_token", &self.hub.access_token),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, v)| v.trim().is_empty())
            .map(|(k, _)| *k)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Config(format!(
                "required fields are empty: {}",
                missing.join(", ")
            )))
        }
    }
}
