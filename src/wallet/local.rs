//! Connector backed by a secp256k1 private key held in process memory.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use secrecy::{ExposeSecret, SecretString};

use crate::error::InferenceError;
use crate::wallet::eth;
use crate::wallet::{Identity, MessageSigner, WalletConnector};

/// Signer over an in-memory key.
pub struct LocalSigner {
    key: SigningKey,
    address: String,
    available: AtomicBool,
}

impl LocalSigner {
    pub fn from_secret(secret: &SecretString) -> Result<Self, String> {
        let bytes = eth::decode_hex(secret.expose_secret())
            .map_err(|e| format!("private key is not valid hex: {e}"))?;
        if bytes.len() != 32 {
            return Err("private key must be 32 bytes".to_string());
        }
        let key = SigningKey::from_slice(&bytes)
            .map_err(|_| "private key is not a valid secp256k1 scalar".to_string())?;
        let address = eth::address_from_verifying_key(key.verifying_key())?;
        Ok(Self {
            key,
            address,
            available: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl MessageSigner for LocalSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign_personal(&self, message: &[u8]) -> Result<[u8; 65], InferenceError> {
        if !self.is_available() {
            return Err(InferenceError::Signing {
                reason: format!("wallet {} is disconnected", self.address),
            });
        }
        eth::sign_personal(&self.key, message).map_err(|reason| InferenceError::Signing { reason })
    }

    fn invalidate(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// Connects by unlocking a configured private key.
pub struct LocalKeyConnector {
    secret: Option<SecretString>,
    active: Mutex<Option<Arc<LocalSigner>>>,
}

impl LocalKeyConnector {
    pub fn new(secret: Option<SecretString>) -> Self {
        Self {
            secret,
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> std::sync::MutexGuard<'_, Option<Arc<LocalSigner>>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl WalletConnector for LocalKeyConnector {
    fn id(&self) -> &'static str {
        "local_key"
    }

    async fn connect(&self) -> Result<Identity, InferenceError> {
        if let Some(signer) = self.active().as_ref()
            && signer.is_available()
        {
            return Ok(Identity::new(signer.clone()));
        }

        let secret = self.secret.as_ref().ok_or_else(|| InferenceError::Connection {
            reason: "no private key configured (set ZG_PRIVATE_KEY)".to_string(),
        })?;
        let signer = Arc::new(
            LocalSigner::from_secret(secret)
                .map_err(|reason| InferenceError::Connection { reason })?,
        );

        *self.active() = Some(signer.clone());
        Ok(Identity::new(signer))
    }

    async fn disconnect(&self) {
        if let Some(signer) = self.active().take() {
            signer.invalidate();
        }
    }

    fn address(&self) -> Option<String> {
        self.active()
            .as_ref()
            .filter(|signer| signer.is_available())
            .map(|signer| signer.address.clone())
    }
}
