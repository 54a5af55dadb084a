//! Wallet identity: an address plus the capability to sign with its key.
//!
//! ```text
//! WalletConnector ──connect()──▶ Identity { address, Arc<dyn MessageSigner> }
//!        │                               │
//!        └──disconnect()──▶ signer.invalidate()  (later signing → Signing error)
//! ```

pub mod eth;
mod local;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::InferenceError;

pub use self::local::{LocalKeyConnector, LocalSigner};

/// Signing capability bound to one wallet key.
#[async_trait]
pub trait MessageSigner: Send + Sync {
    /// Lowercase `0x` address of the key.
    fn address(&self) -> &str;

    /// EIP-191 personal signature (`r || s || v`, `v` in {27, 28}).
    async fn sign_personal(&self, message: &[u8]) -> Result<[u8; 65], InferenceError>;

    /// Permanently revoke this signer. Later signing attempts fail.
    fn invalidate(&self);

    fn is_available(&self) -> bool;
}

/// A connected wallet identity.
///
/// Cloning shares the signer, so invalidating the session's identity
/// invalidates every clone held by in-flight requests.
#[derive(Clone)]
pub struct Identity {
    address: String,
    signer: Arc<dyn MessageSigner>,
}

impl Identity {
    pub fn new(signer: Arc<dyn MessageSigner>) -> Self {
        Self {
            address: signer.address().to_string(),
            signer,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub async fn sign_personal(&self, message: &[u8]) -> Result<[u8; 65], InferenceError> {
        self.signer.sign_personal(message).await
    }

    pub fn invalidate(&self) {
        self.signer.invalidate();
    }

    pub fn is_valid(&self) -> bool {
        self.signer.is_available()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("valid", &self.is_valid())
            .finish()
    }
}

/// Wallet connector seam (injected browser wallet, local key, hardware, ...).
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Short connector id used in config (`ZG_CONNECTORS`).
    fn id(&self) -> &'static str;

    /// Prompt/unlock the wallet. Failures are `InferenceError::Connection`.
    async fn connect(&self) -> Result<Identity, InferenceError>;

    async fn disconnect(&self);

    fn address(&self) -> Option<String>;

    fn is_connected(&self) -> bool {
        self.address().is_some()
    }
}
