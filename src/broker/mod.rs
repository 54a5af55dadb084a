//! Broker transport.
//!
//! The ledger and provider seams ([`LedgerClient`](crate::ledger::LedgerClient),
//! [`ProviderRegistry`](crate::provider::ProviderRegistry)) are satisfied by
//! an HTTP bridge in front of the broker SDK.

mod gateway;

pub use self::gateway::{
    GatewayClient, HEADER_GATEWAY_ADDRESS, HEADER_GATEWAY_SIGNATURE, HEADER_GATEWAY_TIMESTAMP,
    gateway_signing_message,
};
