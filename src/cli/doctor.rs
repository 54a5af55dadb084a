//! `zg-inference doctor` - active health diagnostics.
//!
//! Validates configuration and probes the chain RPC, the broker bridge and
//! the default provider before a real request runs into them. Each check
//! reports pass/fail with the detail needed to fix it.

use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use crate::broker::GatewayClient;
use crate::config::Config;
use crate::provider::ProviderRegistry;
use crate::wallet::{LocalSigner, MessageSigner};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(config_path: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    println!("zg-inference doctor");
    println!("===================\n");

    let mut passed = 0u32;
    let mut failed = 0u32;

    // ── Configuration checks ──────────────────────────────────

    let config = Config::from_env_with_toml(config_path);
    check(
        "Configuration",
        match &config {
            Ok(config) => CheckResult::Pass(format!(
                "chain {} via {}",
                config.chain.chain_id,
                redact_url_for_display(config.chain.rpc_url.as_str())
            )),
            Err(e) => CheckResult::Fail(e.to_string()),
        },
        &mut passed,
        &mut failed,
    );

    let Ok(config) = config else {
        return finish(passed, failed, strict);
    };

    check(
        "Wallet key",
        check_wallet_key(config.wallet.private_key.as_ref()),
        &mut passed,
        &mut failed,
    );

    // ── Reachability checks ───────────────────────────────────

    check(
        "Chain RPC",
        check_rpc_chain_id(config.chain.rpc_url.as_str(), config.chain.chain_id).await,
        &mut passed,
        &mut failed,
    );

    check(
        "Broker bridge",
        probe_http_endpoint("broker bridge", config.broker.url.as_str(), PROBE_TIMEOUT).await,
        &mut passed,
        &mut failed,
    );

    let gateway = GatewayClient::new(config.broker.url.as_str(), PROBE_TIMEOUT);
    check(
        "Default provider metadata",
        check_provider_metadata(&gateway, &config.inference.provider_address).await,
        &mut passed,
        &mut failed,
    );

    finish(passed, failed, strict)
}

fn finish(passed: u32, failed: u32, strict: bool) -> anyhow::Result<()> {
    println!();
    println!("  {passed} passed, {failed} failed");

    if failed > 0 {
        println!("\n  Some checks failed. Requests will fail at the corresponding step.");
        if strict {
            anyhow::bail!("doctor strict mode failed with {failed} check(s)");
        }
    }

    Ok(())
}

// ── Individual checks ───────────────────────────────────────

fn check(name: &str, result: CheckResult, passed: &mut u32, failed: &mut u32) {
    match result {
        CheckResult::Pass(detail) => {
            *passed += 1;
            println!("  [pass] {name}: {detail}");
        }
        CheckResult::Fail(detail) => {
            *failed += 1;
            println!("  [FAIL] {name}: {detail}");
        }
        CheckResult::Skip(reason) => {
            println!("  [skip] {name}: {reason}");
        }
    }
}

enum CheckResult {
    Pass(String),
    Fail(String),
    Skip(String),
}

fn check_wallet_key(secret: Option<&SecretString>) -> CheckResult {
    let Some(secret) = secret else {
        return CheckResult::Fail(format!(
            "no private key; set {} (or put it in {})",
            crate::config::PRIVATE_KEY_ENV_VARS[0],
            crate::bootstrap::zg_env_path().display()
        ));
    };
    match LocalSigner::from_secret(secret) {
        Ok(signer) => CheckResult::Pass(format!(
            "address {}",
            mask_wallet_address(signer.address())
        )),
        Err(e) => CheckResult::Fail(e),
    }
}

async fn check_rpc_chain_id(rpc_url: &str, expected: u64) -> CheckResult {
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(e) => return CheckResult::Fail(format!("cannot construct HTTP client: {e}")),
    };

    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "eth_chainId",
        "params": [],
    });
    let response = match client.post(rpc_url).json(&body).send().await {
        Ok(response) => response,
        Err(e) => {
            return CheckResult::Fail(format!(
                "unreachable ({}): {e}",
                redact_url_for_display(rpc_url)
            ));
        }
    };
    let value: serde_json::Value = match response.json().await {
        Ok(value) => value,
        Err(e) => return CheckResult::Fail(format!("invalid JSON-RPC response: {e}")),
    };

    match value
        .get("result")
        .and_then(|v| v.as_str())
        .and_then(parse_hex_quantity)
    {
        Some(chain_id) if chain_id == expected => CheckResult::Pass(format!("chain id {chain_id}")),
        Some(chain_id) => CheckResult::Fail(format!(
            "RPC reports chain id {chain_id}, config expects {expected}"
        )),
        None => CheckResult::Fail(format!("unexpected eth_chainId response: {value}")),
    }
}

async fn check_provider_metadata(registry: &dyn ProviderRegistry, provider: &str) -> CheckResult {
    match registry.service_metadata(provider).await {
        Ok(metadata) => CheckResult::Pass(format!(
            "{} serves {} at {}",
            mask_wallet_address(provider),
            metadata.model,
            redact_url_for_display(metadata.endpoint.as_str())
        )),
        Err(crate::error::InferenceError::ProviderUnreachable { reason, .. })
            if reason.contains("connection refused") =>
        {
            CheckResult::Skip("broker bridge is not running".to_string())
        }
        Err(e) => CheckResult::Fail(e.to_string()),
    }
}

fn parse_hex_quantity(raw: &str) -> Option<u64> {
    let digits = raw.strip_prefix("0x")?;
    u64::from_str_radix(digits, 16).ok()
}

fn mask_wallet_address(address: &str) -> String {
    let address = address.trim();
    if address.len() < 10 {
        return address.to_string();
    }
    format!("{}...{}", &address[..6], &address[address.len() - 4..])
}

async fn probe_http_endpoint(label: &str, endpoint: &str, timeout: Duration) -> CheckResult {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return CheckResult::Fail(format!("{label} endpoint is empty"));
    }

    let url = match reqwest::Url::parse(endpoint) {
        Ok(url) => url,
        Err(e) => {
            return CheckResult::Fail(format!(
                "{label} endpoint URL is invalid ({}): {e}",
                redact_url_for_display(endpoint)
            ));
        }
    };

    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => return CheckResult::Fail(format!("cannot construct HTTP client: {e}")),
    };

    match client.get(url.clone()).send().await {
        Ok(response) => {
            let status = response.status();
            if status.is_server_error() {
                CheckResult::Fail(format!(
                    "{label} reachable but unhealthy ({} at {})",
                    status,
                    redact_url_for_display(url.as_str())
                ))
            } else {
                CheckResult::Pass(format!(
                    "{} ({status})",
                    redact_url_for_display(url.as_str())
                ))
            }
        }
        Err(e) => CheckResult::Fail(format!(
            "{label} unreachable ({}): {e}",
            redact_url_for_display(url.as_str())
        )),
    }
}

fn redact_url_for_display(raw: &str) -> String {
    match reqwest::Url::parse(raw) {
        Ok(mut url) => {
            if !url.username().is_empty() {
                let _ = url.set_username("redacted");
            }
            if url.password().is_some() {
                let _ = url.set_password(Some("redacted"));
            }
            url.set_query(None);
            url.to_string()
        }
        Err(_) => "<invalid-url>".to_string(),
    }
}
