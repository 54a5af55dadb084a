//! zg-inference: wallet-funded, pay-per-request inference against 0G
//! compute providers.
//!
//! A session connects a wallet, keeps its prepaid ledger balance above a
//! threshold, acknowledges each provider once, and signs every request it
//! dispatches. [`orchestrator::Orchestrator`] sequences the steps; the
//! broker is reached through [`broker::GatewayClient`] or any other
//! implementation of [`ledger::LedgerClient`] and
//! [`provider::ProviderRegistry`].

pub mod auth;
pub mod bootstrap;
pub mod broker;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod provider;
pub mod redact;
pub mod settings;
pub mod wallet;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{Completion, Orchestrator, OrchestratorBuilder, Phase, SessionSnapshot};
