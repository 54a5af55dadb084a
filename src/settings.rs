//! File-backed settings.
//!
//! Stored in `~/.zg-inference/config.toml`. Every field is optional in the
//! file; missing values fall back to the defaults below. Environment
//! variables override whatever the file says (see [`crate::config`]).
//!
//! The wallet private key is deliberately absent: it is only read from the
//! environment.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Root of per-user state: `~/.zg-inference`.
pub fn zg_home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".zg-inference")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub chain: ChainSettings,
    pub wallet: WalletSettings,
    pub broker: BrokerSettings,
    pub inference: InferenceSettings,
    pub funding: FundingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSettings {
    /// EVM chain id (0G Galileo testnet by default).
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// JSON-RPC endpoint of the chain.
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
}

fn default_chain_id() -> u64 {
    16_601
}

fn default_rpc_url() -> String {
    "https://evmrpc-testnet.0g.ai".to_string()
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
            rpc_url: default_rpc_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSettings {
    /// Enabled wallet connectors, in preference order.
    #[serde(default = "default_connectors")]
    pub connectors: Vec<String>,
}

fn default_connectors() -> Vec<String> {
    vec!["local_key".to_string()]
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            connectors: default_connectors(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSettings {
    /// Base URL of the broker HTTP bridge.
    #[serde(default = "default_broker_url")]
    pub url: String,

    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_broker_url() -> String {
    "http://127.0.0.1:3721".to_string()
}

fn default_gateway_timeout_ms() -> u64 {
    30_000
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            timeout_ms: default_gateway_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Provider used when a request names none.
    #[serde(default = "default_provider_address")]
    pub provider_address: String,

    /// Bound on one chat-completions exchange.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Ask the broker to verify each completion.
    #[serde(default)]
    pub verify_responses: bool,

    /// Memoize service metadata for the lifetime of a session.
    #[serde(default)]
    pub cache_metadata: bool,
}

fn default_provider_address() -> String {
    "0xf07240Efa67755B5311bc75784a061eDB47165Dd".to_string()
}

fn default_dispatch_timeout_ms() -> u64 {
    60_000
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            provider_address: default_provider_address(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            verify_responses: false,
            cache_metadata: false,
        }
    }
}

/// Decimal OG strings; parsed into neuron amounts by the config layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingSettings {
    #[serde(default = "default_topup_threshold")]
    pub threshold: String,

    #[serde(default = "default_topup_amount")]
    pub top_up_amount: String,
}

fn default_topup_threshold() -> String {
    "0.1".to_string()
}

fn default_topup_amount() -> String {
    "1".to_string()
}

impl Default for FundingSettings {
    fn default() -> Self {
        Self {
            threshold: default_topup_threshold(),
            top_up_amount: default_topup_amount(),
        }
    }
}

impl Settings {
    /// Default TOML config file path (~/.zg-inference/config.toml).
    pub fn default_toml_path() -> PathBuf {
        zg_home_dir().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `Ok(None)` if the file does not exist.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        let settings: Self = toml::from_str(&data)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))?;
        Ok(Some(settings))
    }
}
