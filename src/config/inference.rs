use std::time::Duration;

use crate::config::helpers::{optional_env, parse_bool_env, parse_og_amount, parse_timeout_ms};
use crate::error::ConfigError;
use crate::ledger::FundingPolicy;
use crate::settings::Settings;
use crate::wallet::eth;

pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 60_000;

/// Inference request configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceConfig {
    /// Lowercase provider address used when a request names none.
    pub provider_address: String,
    pub dispatch_timeout: Duration,
    pub verify_responses: bool,
    pub cache_metadata: bool,
}

impl InferenceConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let raw_provider = optional_env("ZG_PROVIDER_ADDRESS")?
            .unwrap_or_else(|| settings.inference.provider_address.clone());
        let provider_address = eth::normalize_wallet_address(&raw_provider).ok_or_else(|| {
            ConfigError::InvalidValue {
                key: "ZG_PROVIDER_ADDRESS".to_string(),
                message: format!("'{raw_provider}' is not a 0x-prefixed 20-byte address"),
            }
        })?;

        Ok(Self {
            provider_address,
            dispatch_timeout: parse_timeout_ms(
                "ZG_DISPATCH_TIMEOUT_MS",
                settings.inference.dispatch_timeout_ms,
            )?,
            verify_responses: parse_bool_env(
                "ZG_VERIFY_RESPONSES",
                settings.inference.verify_responses,
            )?,
            cache_metadata: parse_bool_env("ZG_CACHE_METADATA", settings.inference.cache_metadata)?,
        })
    }
}

pub(crate) fn resolve_funding(settings: &Settings) -> Result<FundingPolicy, ConfigError> {
    let threshold = parse_og_amount("ZG_TOPUP_THRESHOLD", &settings.funding.threshold)?;
    let top_up_amount = parse_og_amount("ZG_TOPUP_AMOUNT", &settings.funding.top_up_amount)?;
    if top_up_amount.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: "ZG_TOPUP_AMOUNT".to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(FundingPolicy {
        threshold,
        top_up_amount,
    })
}
