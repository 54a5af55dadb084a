use secrecy::SecretString;

use crate::config::helpers::{optional_env, optional_env_any};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Env vars holding the wallet private key, most preferred first.
pub const PRIVATE_KEY_ENV_VARS: [&str; 2] = ["ZG_PRIVATE_KEY", "ZEROG_TESTNET_PRIVATE_KEY"];

/// Wallet connectors this build can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    /// secp256k1 key from the environment.
    LocalKey,
}

impl ConnectorKind {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "local_key" | "local" | "private_key" => Ok(Self::LocalKey),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("unknown wallet connector '{value}' (expected 'local_key')"),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalKey => "local_key",
        }
    }
}

/// Wallet configuration.
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Enabled connectors in preference order. Never empty.
    pub connectors: Vec<ConnectorKind>,
    pub private_key: Option<SecretString>,
}

impl WalletConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let raw: Vec<String> = match optional_env("ZG_CONNECTORS")? {
            Some(list) => list.split(',').map(str::to_string).collect(),
            None => settings.wallet.connectors.clone(),
        };

        let mut connectors = Vec::new();
        for entry in raw.iter().filter(|s| !s.trim().is_empty()) {
            let kind = ConnectorKind::parse(entry, "ZG_CONNECTORS")?;
            if !connectors.contains(&kind) {
                connectors.push(kind);
            }
        }
        if connectors.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "ZG_CONNECTORS".to_string(),
                message: "at least one wallet connector must be enabled".to_string(),
            });
        }

        Ok(Self {
            connectors,
            private_key: optional_env_any(&PRIVATE_KEY_ENV_VARS)?.map(SecretString::from),
        })
    }

    /// Connector used by the CLI.
    pub fn primary_connector(&self) -> ConnectorKind {
        self.connectors
            .first()
            .copied()
            .unwrap_or(ConnectorKind::LocalKey)
    }
}
