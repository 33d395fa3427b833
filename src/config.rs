//! Core Configuration
//!
//! Process configuration for the transfer core, loaded from a JSON file and
//! overridable from the environment. Endpoint URLs must use HTTPS except
//! for local development hosts. API keys never leave [`SecretString`].

use crate::error::{TransferError, TransferResult};
use crate::signing::{SigningSettings, DEFAULT_COIN_TYPE};
use crate::tx::DEFAULT_OUTPUT_SATOSHIS;
use crate::utils::LogFormat;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const ENV_POLICY_URL: &str = "COSIGN_POLICY_URL";
pub const ENV_POLICY_API_KEY: &str = "COSIGN_POLICY_API_KEY";
pub const ENV_SIGNER_URL: &str = "COSIGN_SIGNER_URL";
pub const ENV_SIGNER_API_KEY: &str = "COSIGN_SIGNER_API_KEY";
pub const ENV_SIGNER_PRIVATE_KEY: &str = "COSIGN_SIGNER_PRIVATE_KEY";
pub const ENV_LOG_LEVEL: &str = "COSIGN_LOG_LEVEL";

fn secret_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Token policy cosigner endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySection {
    pub url: String,
    #[serde(default, deserialize_with = "secret_opt")]
    pub api_key: Option<SecretString>,
}

/// Remote custodial signer endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerSection {
    pub url: String,
    #[serde(default, deserialize_with = "secret_opt")]
    pub api_key: Option<SecretString>,
    /// PEM RSA key that signs each request's bearer token
    #[serde(default, deserialize_with = "secret_opt")]
    pub private_key: Option<SecretString>,
    #[serde(default = "default_coin_type")]
    pub coin_type: u32,
    #[serde(default = "default_asset_id")]
    pub asset_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SigningSection {
    pub poll_interval_ms: u64,
    pub max_wait_secs: u64,
}

impl Default for SigningSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2_000,
            max_wait_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferSection {
    /// Satoshis locked in each token output
    pub output_satoshis: u64,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            output_satoshis: DEFAULT_OUTPUT_SATOSHIS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSection {
    pub level: String,
    /// "pretty" or "json"
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingSection {
    pub fn log_format(&self) -> LogFormat {
        LogFormat::from_str_lossy(&self.format)
    }
}

fn default_coin_type() -> u32 {
    DEFAULT_COIN_TYPE
}

fn default_asset_id() -> String {
    "BSV".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CoreConfig {
    pub policy: PolicySection,
    pub signer: SignerSection,
    #[serde(default)]
    pub signing: SigningSection,
    #[serde(default)]
    pub transfer: TransferSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl CoreConfig {
    /// Read, apply environment overrides, validate
    pub fn load(path: &Path) -> TransferResult<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TransferError::config(format!("Cannot read {}: {}", path.display(), e)))?;
        let mut config = Self::from_json_str(&contents)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> TransferResult<Self> {
        serde_json::from_str(json).map_err(|e| TransferError::config(format!("Invalid config: {}", e)))
    }

    /// Apply `COSIGN_*` overrides from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_POLICY_URL) {
            self.policy.url = url;
        }
        if let Some(key) = lookup(ENV_POLICY_API_KEY) {
            self.policy.api_key = Some(SecretString::from(key));
        }
        if let Some(url) = lookup(ENV_SIGNER_URL) {
            self.signer.url = url;
        }
        if let Some(key) = lookup(ENV_SIGNER_API_KEY) {
            self.signer.api_key = Some(SecretString::from(key));
        }
        if let Some(pem) = lookup(ENV_SIGNER_PRIVATE_KEY) {
            self.signer.private_key = Some(SecretString::from(pem));
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> TransferResult<()> {
        validate_service_url("policy", &self.policy.url)?;
        validate_service_url("signer", &self.signer.url)?;

        if self.signer.api_key.is_none() {
            return Err(TransferError::config("signer.apiKey is required"));
        }
        if self.signer.private_key.is_none() {
            return Err(TransferError::config("signer.privateKey is required"));
        }
        if self.signing.poll_interval_ms == 0 {
            return Err(TransferError::config("signing.pollIntervalMs must be positive"));
        }
        if self.signing.max_wait_secs == 0 {
            return Err(TransferError::config("signing.maxWaitSecs must be positive"));
        }
        if self.transfer.output_satoshis == 0 {
            return Err(TransferError::config("transfer.outputSatoshis must be positive"));
        }
        Ok(())
    }

    pub fn signing_settings(&self) -> SigningSettings {
        SigningSettings {
            poll_interval: Duration::from_millis(self.signing.poll_interval_ms),
            max_wait: Duration::from_secs(self.signing.max_wait_secs),
            coin_type: self.signer.coin_type,
            asset_id: self.signer.asset_id.clone(),
        }
    }
}

/// HTTPS, or plain HTTP to a local host
pub fn validate_service_url(name: &str, raw: &str) -> TransferResult<Url> {
    let parsed = Url::parse(raw)
        .map_err(|e| TransferError::config(format!("{} url {:?} is invalid: {}", name, raw, e)))?;

    match parsed.scheme() {
        "https" => {}
        "http" => {
            let local = matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "[::1]"));
            if !local {
                return Err(TransferError::config(format!(
                    "{} url must use HTTPS for remote hosts",
                    name
                )));
            }
        }
        other => {
            return Err(TransferError::config(format!("{} url has unsupported scheme {}", name, other)));
        }
    }

    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(TransferError::config(format!(
            "{} url must not embed credentials; use apiKey",
            name
        )));
    }
    Ok(parsed)
}
