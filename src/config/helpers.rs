use std::time::Duration;

use crate::error::ConfigError;
use crate::ledger::Amount;

/// Read an env var, treating unset and blank the same.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.trim().is_empty() => Ok(None),
        Ok(val) => Ok(Some(val.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

/// First set variable among `keys`.
pub(crate) fn optional_env_any(keys: &[&str]) -> Result<Option<String>, ConfigError> {
    for key in keys {
        if let Some(value) = optional_env(key)? {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    match optional_env(key)? {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{raw}'"),
            }),
        },
    }
}

/// Millisecond timeout from `key` (or `default`); zero is rejected.
pub(crate) fn parse_timeout_ms(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let timeout_ms = optional_env(key)?
        .map(|s| s.parse::<u64>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a positive integer: {e}"),
        })?
        .unwrap_or(default);
    if timeout_ms == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(Duration::from_millis(timeout_ms))
}

/// Decimal OG amount from `key` (or the settings value `fallback`).
pub(crate) fn parse_og_amount(key: &str, fallback: &str) -> Result<Amount, ConfigError> {
    let raw = optional_env(key)?.unwrap_or_else(|| fallback.to_string());
    Amount::parse_og(&raw).map_err(|message| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    })
}

pub(crate) fn parse_http_url(key: &str, raw: &str) -> Result<url::Url, ConfigError> {
    let url = url::Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("invalid URL '{raw}': {e}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected an http(s) URL, got '{raw}'"),
        });
    }
    Ok(url)
}
