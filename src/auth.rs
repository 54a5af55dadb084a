//! Per-request authentication headers.
//!
//! Headers bind the serialized message payload, the wallet identity, and an
//! acknowledged provider. Each call draws a fresh nonce, so two header sets
//! are never interchangeable even for identical payloads.

use std::collections::BTreeMap;

use chrono::Utc;
use uuid::Uuid;

use crate::error::InferenceError;
use crate::provider::AckRegistry;
use crate::wallet::{Identity, eth};

pub const HEADER_WALLET_ADDRESS: &str = "X-Wallet-Address";
pub const HEADER_PROVIDER_ADDRESS: &str = "X-Provider-Address";
pub const HEADER_NONCE: &str = "X-Request-Nonce";
pub const HEADER_TIMESTAMP: &str = "X-Request-Timestamp";
pub const HEADER_REQUEST_HASH: &str = "X-Request-Hash";
pub const HEADER_SIGNATURE: &str = "X-Request-Signature";

const SIGNING_DOMAIN: &str = "zg-inference:v1";

/// Header name → value, single use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders(BTreeMap<String, String>);

impl AuthHeaders {
    /// Case-insensitive lookup; HTTP stacks lowercase names in transit.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Rebuild a header set on the receiving side.
impl FromIterator<(String, String)> for AuthHeaders {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Canonical string the wallet signs for one request.
pub fn signing_message(
    provider: &str,
    nonce: &str,
    timestamp_ms: i64,
    request_hash: &str,
) -> String {
    format!("{SIGNING_DOMAIN}\n{provider}\n{nonce}\n{timestamp_ms}\n{request_hash}")
}

/// `0x` + keccak256 of the serialized messages.
pub fn payload_hash(payload: &str) -> String {
    format!("0x{}", eth::encode_hex_lower(&eth::keccak256(payload.as_bytes())))
}

/// Derives request headers for acknowledged providers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestAuthenticator;

impl RequestAuthenticator {
    pub fn new() -> Self {
        Self
    }

    pub async fn sign(
        &self,
        identity: &Identity,
        acks: &AckRegistry,
        provider: &str,
        payload: &str,
    ) -> Result<AuthHeaders, InferenceError> {
        if !acks.is_acknowledged(provider) {
            return Err(InferenceError::UnacknowledgedProvider {
                provider: provider.to_string(),
            });
        }

        let nonce = Uuid::new_v4().to_string();
        let timestamp_ms = Utc::now().timestamp_millis();
        let request_hash = payload_hash(payload);
        let message = signing_message(provider, &nonce, timestamp_ms, &request_hash);
        let signature = identity.sign_personal(message.as_bytes()).await?;

        let mut headers = BTreeMap::new();
        headers.insert(
            HEADER_WALLET_ADDRESS.to_string(),
            identity.address().to_string(),
        );
        headers.insert(HEADER_PROVIDER_ADDRESS.to_string(), provider.to_string());
        headers.insert(HEADER_NONCE.to_string(), nonce);
        headers.insert(HEADER_TIMESTAMP.to_string(), timestamp_ms.to_string());
        headers.insert(HEADER_REQUEST_HASH.to_string(), request_hash);
        headers.insert(
            HEADER_SIGNATURE.to_string(),
            format!("0x{}", eth::encode_hex_lower(&signature)),
        );

        tracing::debug!(provider, "Generated request headers");
        Ok(AuthHeaders(headers))
    }
}

/// Check that `headers` were signed by the wallet they name over `payload`.
pub fn verify_headers(headers: &AuthHeaders, payload: &str) -> Result<String, String> {
    let field = |name: &'static str| required_header(headers, name);

    let wallet = field(HEADER_WALLET_ADDRESS)?;
    let expected_hash = payload_hash(payload);
    if field(HEADER_REQUEST_HASH)? != expected_hash {
        return Err("request hash does not match payload".to_string());
    }

    let timestamp_ms: i64 = field(HEADER_TIMESTAMP)?
        .parse()
        .map_err(|e| format!("invalid timestamp: {e}"))?;
    let message = signing_message(
        field(HEADER_PROVIDER_ADDRESS)?,
        field(HEADER_NONCE)?,
        timestamp_ms,
        &expected_hash,
    );
    let signature = eth::decode_hex(field(HEADER_SIGNATURE)?)?;
    let recovered = eth::recover_personal_signer(message.as_bytes(), &signature)?;
    if recovered != wallet {
        return Err("signature does not match wallet address".to_string());
    }
    Ok(recovered)
}

fn required_header<'a>(headers: &'a AuthHeaders, name: &str) -> Result<&'a str, String> {
    headers
        .get(name)
        .ok_or_else(|| format!("missing header {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    use crate::wallet::{LocalKeyConnector, WalletConnector};

    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const PROVIDER: &str = "0xf07240efa67755b5311bc75784a061edb47165dd";
    const PAYLOAD: &str = r#"[{"role":"user","content":"Say hello"}]"#;

    async fn connected() -> (LocalKeyConnector, Identity) {
        let connector = LocalKeyConnector::new(Some(SecretString::from(ANVIL_KEY)));
        let identity = connector.connect().await.unwrap();
        (connector, identity)
    }

    async fn acked() -> AckRegistry {
        let acks = AckRegistry::new();
        acks.ensure_acknowledged(PROVIDER, || async { Ok(()) })
            .await
            .unwrap();
        acks
    }

    #[tokio::test]
    async fn unacknowledged_provider_is_refused() {
        let (_connector, identity) = connected().await;
        let err = RequestAuthenticator::new()
            .sign(&identity, &AckRegistry::new(), PROVIDER, PAYLOAD)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::UnacknowledgedProvider { .. }));
    }

    #[tokio::test]
    async fn headers_verify_against_payload_and_wallet() {
        let (_connector, identity) = connected().await;
        let headers = RequestAuthenticator::new()
            .sign(&identity, &acked().await, PROVIDER, PAYLOAD)
            .await
            .unwrap();

        assert_eq!(headers.len(), 6);
        assert_eq!(headers.get(HEADER_PROVIDER_ADDRESS), Some(PROVIDER));
        assert_eq!(
            verify_headers(&headers, PAYLOAD).unwrap(),
            identity.address()
        );
        assert!(verify_headers(&headers, "[]").is_err());
    }

    #[tokio::test]
    async fn each_call_uses_a_fresh_nonce() {
        let (_connector, identity) = connected().await;
        let acks = acked().await;
        let auth = RequestAuthenticator::new();

        let a = auth.sign(&identity, &acks, PROVIDER, PAYLOAD).await.unwrap();
        let b = auth.sign(&identity, &acks, PROVIDER, PAYLOAD).await.unwrap();
        assert_ne!(a.get(HEADER_NONCE), b.get(HEADER_NONCE));
        assert_ne!(a.get(HEADER_SIGNATURE), b.get(HEADER_SIGNATURE));
    }

    #[tokio::test]
    async fn disconnected_wallet_cannot_sign() {
        let (connector, identity) = connected().await;
        let acks = acked().await;
        connector.disconnect().await;

        let err = RequestAuthenticator::new()
            .sign(&identity, &acks, PROVIDER, PAYLOAD)
            .await
            .unwrap_err();
        assert!(matches!(err, InferenceError::Signing { .. }));
    }
}
