//! Configuration for zg-inference.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! `./.env` and `~/.zg-inference/.env` are loaded via dotenvy early in
//! startup, so values there behave like env vars that were not already set.

pub(crate) mod helpers;
mod inference;
mod wallet;

use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::ledger::FundingPolicy;
use crate::settings::Settings;

pub use self::inference::{DEFAULT_DISPATCH_TIMEOUT_MS, InferenceConfig};
pub use self::wallet::{ConnectorKind, PRIVATE_KEY_ENV_VARS, WalletConfig};

/// Main configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub broker: BrokerConfig,
    pub inference: InferenceConfig,
    pub funding: FundingPolicy,
}

/// Chain the wallet and ledger live on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_url: url::Url,
}

impl ChainConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let chain_id = helpers::optional_env("ZG_CHAIN_ID")?
            .map(|s| s.parse::<u64>())
            .transpose()
            .map_err(|e| ConfigError::InvalidValue {
                key: "ZG_CHAIN_ID".to_string(),
                message: format!("must be a positive integer: {e}"),
            })?
            .unwrap_or(settings.chain.chain_id);
        if chain_id == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ZG_CHAIN_ID".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let rpc_url = helpers::optional_env("ZG_RPC_URL")?
            .unwrap_or_else(|| settings.chain.rpc_url.clone());
        Ok(Self {
            chain_id,
            rpc_url: helpers::parse_http_url("ZG_RPC_URL", &rpc_url)?,
        })
    }
}

/// Broker HTTP bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub url: url::Url,
    pub timeout: Duration,
}

impl BrokerConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let url = helpers::optional_env("ZG_BROKER_URL")?
            .unwrap_or_else(|| settings.broker.url.clone());
        Ok(Self {
            url: helpers::parse_http_url("ZG_BROKER_URL", &url)?,
            timeout: helpers::parse_timeout_ms("ZG_GATEWAY_TIMEOUT_MS", settings.broker.timeout_ms)?,
        })
    }
}

impl Config {
    /// Load configuration from the environment and the default TOML file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file overlay.
    ///
    /// If `toml_path` is `Some`, the file must exist and parse. If `None`,
    /// `~/.zg-inference/config.toml` is tried and a missing file is ignored.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        crate::bootstrap::load_zg_env();
        let settings = Self::load_settings(toml_path)?;
        Self::build(&settings)
    }

    fn load_settings(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(settings)) => {
                tracing::debug!("Loaded TOML config from {}", path.display());
                Ok(settings)
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Ok(Settings::default())
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
                Ok(Settings::default())
            }
        }
    }

    /// Resolve every section against `settings`, env vars winning.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            chain: ChainConfig::resolve(settings)?,
            wallet: WalletConfig::resolve(settings)?,
            broker: BrokerConfig::resolve(settings)?,
            inference: InferenceConfig::resolve(settings)?,
            funding: inference::resolve_funding(settings)?,
        })
    }
}
