//! `reqwest` client for the broker HTTP bridge.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::dispatch::describe_transport_error;
use crate::error::{IdentityErrorKind, InferenceError};
use crate::ledger::{Amount, LedgerAccount, LedgerClient, validate_top_up};
use crate::provider::{ProviderRegistry, ServiceMetadata};
use crate::redact::redact_sensitive_detail;
use crate::wallet::{Identity, eth};

pub const HEADER_GATEWAY_ADDRESS: &str = "X-Wallet-Address";
pub const HEADER_GATEWAY_TIMESTAMP: &str = "X-Wallet-Timestamp";
pub const HEADER_GATEWAY_SIGNATURE: &str = "X-Wallet-Signature";

const GATEWAY_SIGNING_DOMAIN: &str = "zg-gateway:v1";

/// Canonical string signed for one mutating gateway call.
pub fn gateway_signing_message(method: &str, path: &str, timestamp_ms: i64, body: &str) -> String {
    let body_hash = eth::encode_hex_lower(&eth::keccak256(body.as_bytes()));
    format!("{GATEWAY_SIGNING_DOMAIN}\n{method}\n{path}\n{timestamp_ms}\n0x{body_hash}")
}

#[derive(Debug, Deserialize)]
struct MetadataBody {
    endpoint: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct VerifyBody {
    valid: Option<bool>,
}

/// Broker bridge client implementing both broker seams.
pub struct GatewayClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, url: &str, error: &reqwest::Error) -> InferenceError {
        if error.is_timeout() {
            return InferenceError::Timeout {
                target: url.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            };
        }
        InferenceError::Network {
            target: url.to_string(),
            reason: describe_transport_error(error),
        }
    }

    /// GET `path`, returning the status and body text.
    async fn get(&self, path: &str) -> Result<(StatusCode, String), InferenceError> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, &e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(&url, &e))?;
        Ok((status, text))
    }

    /// POST a JSON body signed by `identity`.
    async fn post_signed(
        &self,
        identity: &Identity,
        path: &str,
        body: serde_json::Value,
    ) -> Result<(StatusCode, String), InferenceError> {
        let url = self.url(path);
        let body = body.to_string();
        let timestamp_ms = Utc::now().timestamp_millis();
        let message = gateway_signing_message(Method::POST.as_str(), path, timestamp_ms, &body);
        let signature = identity.sign_personal(message.as_bytes()).await?;

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(HEADER_GATEWAY_ADDRESS, identity.address())
            .header(HEADER_GATEWAY_TIMESTAMP, timestamp_ms.to_string())
            .header(
                HEADER_GATEWAY_SIGNATURE,
                format!("0x{}", eth::encode_hex_lower(&signature)),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, &e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(&url, &e))?;
        Ok((status, text))
    }

    fn unexpected_status(&self, path: &str, status: StatusCode, body: &str) -> InferenceError {
        InferenceError::Network {
            target: self.url(path),
            reason: format!("HTTP {}: {}", status, redact_sensitive_detail(body.trim())),
        }
    }
}

#[async_trait]
impl LedgerClient for GatewayClient {
    async fn get_balance(&self, identity: &Identity) -> Result<LedgerAccount, InferenceError> {
        let path = format!("/ledger/{}", identity.address());
        let (status, text) = self.get(&path).await?;

        match status {
            s if s.is_success() => {
                serde_json::from_str(&text).map_err(|e| InferenceError::Network {
                    target: self.url(&path),
                    reason: format!("invalid ledger response: {e}"),
                })
            }
            StatusCode::NOT_FOUND => Err(InferenceError::Identity {
                address: identity.address().to_string(),
                kind: IdentityErrorKind::NoLedgerAccount,
            }),
            StatusCode::FORBIDDEN => Err(InferenceError::Identity {
                address: identity.address().to_string(),
                kind: IdentityErrorKind::PermissionDenied,
            }),
            s => Err(self.unexpected_status(&path, s, &text)),
        }
    }

    async fn top_up(&self, identity: &Identity, amount: Amount) -> Result<(), InferenceError> {
        validate_top_up(amount)?;

        let path = format!("/ledger/{}/deposit", identity.address());
        let (status, text) = self
            .post_signed(identity, &path, json!({ "amount": amount }))
            .await?;

        match status {
            s if s.is_success() => {
                tracing::info!(address = %identity.address(), %amount, "Ledger deposit accepted");
                Ok(())
            }
            StatusCode::PAYMENT_REQUIRED => Err(InferenceError::InsufficientFunds {
                requested: amount.to_string(),
            }),
            StatusCode::FORBIDDEN => Err(InferenceError::Identity {
                address: identity.address().to_string(),
                kind: IdentityErrorKind::PermissionDenied,
            }),
            s => Err(self.unexpected_status(&path, s, &text)),
        }
    }
}

#[async_trait]
impl ProviderRegistry for GatewayClient {
    async fn acknowledge_provider(
        &self,
        identity: &Identity,
        provider: &str,
    ) -> Result<(), InferenceError> {
        let path = format!("/providers/{provider}/acknowledge");
        let (status, text) = self
            .post_signed(identity, &path, json!({ "user": identity.address() }))
            .await?;

        match status {
            s if s.is_success() => Ok(()),
            StatusCode::FORBIDDEN => Err(InferenceError::Identity {
                address: identity.address().to_string(),
                kind: IdentityErrorKind::PermissionDenied,
            }),
            s if s == StatusCode::NOT_FOUND || s.is_server_error() => {
                Err(InferenceError::ProviderUnreachable {
                    provider: provider.to_string(),
                    reason: format!("HTTP {}: {}", s, redact_sensitive_detail(text.trim())),
                })
            }
            s => Err(self.unexpected_status(&path, s, &text)),
        }
    }

    async fn service_metadata(&self, provider: &str) -> Result<ServiceMetadata, InferenceError> {
        let path = format!("/providers/{provider}/metadata");
        let unreachable = |reason: String| InferenceError::ProviderUnreachable {
            provider: provider.to_string(),
            reason,
        };

        let (status, text) = self.get(&path).await.map_err(|e| match e {
            InferenceError::Network { reason, .. } => unreachable(reason),
            other => other,
        })?;
        if !status.is_success() {
            return Err(unreachable(format!(
                "HTTP {}: {}",
                status,
                redact_sensitive_detail(text.trim())
            )));
        }

        let body: MetadataBody = serde_json::from_str(&text)
            .map_err(|e| unreachable(format!("invalid metadata response: {e}")))?;
        ServiceMetadata::parse(provider, &body.endpoint, &body.model)
    }

    async fn verify_response(
        &self,
        identity: &Identity,
        provider: &str,
        chat_id: &str,
        content: &str,
    ) -> Result<Option<bool>, InferenceError> {
        let path = format!("/providers/{provider}/verify");
        let (status, text) = self
            .post_signed(
                identity,
                &path,
                json!({
                    "user": identity.address(),
                    "chatId": chat_id,
                    "content": content,
                }),
            )
            .await?;

        if !status.is_success() {
            return Err(InferenceError::ProviderUnreachable {
                provider: provider.to_string(),
                reason: format!("verification HTTP {}", status),
            });
        }
        let body: VerifyBody =
            serde_json::from_str(&text).map_err(|e| InferenceError::ProviderUnreachable {
                provider: provider.to_string(),
                reason: format!("invalid verification response: {e}"),
            })?;
        Ok(body.valid)
    }
}
