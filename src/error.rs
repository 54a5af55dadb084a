//! Error types for zg-inference.

use serde::Serialize;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),
}

/// Why an identity was rejected by the ledger or broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityErrorKind {
    /// First use: the identity has never funded a ledger account.
    NoLedgerAccount,
    /// The broker refused the identity for this operation.
    PermissionDenied,
}

impl IdentityErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoLedgerAccount => "no_ledger_account",
            Self::PermissionDenied => "permission_denied",
        }
    }
}

/// Failures of the metered-inference flow.
///
/// Every variant is local to one request except `Connection`, which leaves
/// the session disconnected. The type is `Clone` so a single in-flight
/// acknowledgment outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InferenceError {
    #[error("Wallet connection failed: {reason}")]
    Connection { reason: String },

    #[error("Identity {address} rejected: {}", kind.as_str())]
    Identity {
        address: String,
        kind: IdentityErrorKind,
    },

    #[error("Network error talking to {target}: {reason}")]
    Network { target: String, reason: String },

    #[error("Insufficient wallet funds to deposit {requested}")]
    InsufficientFunds { requested: String },

    #[error("Provider {provider} unreachable: {reason}")]
    ProviderUnreachable { provider: String, reason: String },

    #[error("Provider {provider} has not been acknowledged in this session")]
    UnacknowledgedProvider { provider: String },

    #[error("Signing failed: {reason}")]
    Signing { reason: String },

    #[error("Request to {target} timed out after {timeout_ms} ms")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("Malformed inference response: {reason}")]
    MalformedResponse { reason: String },

    #[error("Inference endpoint returned HTTP {status}: {body}")]
    InferenceHttp { status: u16, body: String },

    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("No wallet connected")]
    NotConnected,

    #[error("Session ended before the request completed; result discarded")]
    SessionEnded,
}

impl InferenceError {
    /// Stable machine-readable code for status surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Identity { .. } => "identity",
            Self::Network { .. } => "network",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::ProviderUnreachable { .. } => "provider_unreachable",
            Self::UnacknowledgedProvider { .. } => "unacknowledged_provider",
            Self::Signing { .. } => "signing",
            Self::Timeout { .. } => "timeout",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::InferenceHttp { .. } => "inference_http",
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::NotConnected => "not_connected",
            Self::SessionEnded => "session_ended",
        }
    }

    /// Whether the failure tears the session down.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// True for the first-use case that callers treat as a zero balance.
    pub fn is_missing_ledger_account(&self) -> bool {
        matches!(
            self,
            Self::Identity {
                kind: IdentityErrorKind::NoLedgerAccount,
                ..
            }
        )
    }
}

/// Structured error payload for status surfaces.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub session_fatal: bool,
    pub message: String,
}

impl From<&InferenceError> for ErrorPayload {
    fn from(err: &InferenceError) -> Self {
        Self {
            code: err.code(),
            session_fatal: err.is_session_fatal(),
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
