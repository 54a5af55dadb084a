//! Inference provider seam: signer acknowledgment, service metadata, and
//! response verification.

mod ack;
mod metadata;

use async_trait::async_trait;
use url::Url;

use crate::error::InferenceError;
use crate::wallet::Identity;

pub use self::ack::{AckOutcome, AckRegistry, AckStatus};
pub use self::metadata::MetadataResolver;

/// Where and what to call for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceMetadata {
    pub endpoint: Url,
    pub model: String,
}

impl ServiceMetadata {
    /// Validate raw broker output into metadata.
    pub fn parse(provider: &str, endpoint: &str, model: &str) -> Result<Self, InferenceError> {
        let unreachable = |reason: String| InferenceError::ProviderUnreachable {
            provider: provider.to_string(),
            reason,
        };

        let endpoint = Url::parse(endpoint.trim())
            .map_err(|e| unreachable(format!("invalid endpoint '{}': {}", endpoint, e)))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(unreachable(format!(
                "endpoint scheme '{}' is not http(s)",
                endpoint.scheme()
            )));
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(unreachable("service metadata has no model".to_string()));
        }

        Ok(Self {
            endpoint,
            model: model.to_string(),
        })
    }

    /// `{endpoint}/chat/completions`, tolerating a trailing slash. Any
    /// query string on the endpoint is kept after the path.
    pub fn completions_url(&self) -> String {
        let mut url = self.endpoint.clone();
        // http(s) URLs always have a base, so this never fails after `parse`.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["chat", "completions"]);
        }
        url.to_string()
    }
}

/// Broker operations scoped to inference providers.
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    /// Register trust in the provider's signer. Idempotent on the broker.
    async fn acknowledge_provider(
        &self,
        identity: &Identity,
        provider: &str,
    ) -> Result<(), InferenceError>;

    async fn service_metadata(&self, provider: &str) -> Result<ServiceMetadata, InferenceError>;

    /// Check a completion against the provider's attestation.
    ///
    /// `Ok(None)` means the provider offers no verifiable response.
    async fn verify_response(
        &self,
        _identity: &Identity,
        _provider: &str,
        _chat_id: &str,
        _content: &str,
    ) -> Result<Option<bool>, InferenceError> {
        Ok(None)
    }
}
