//! Command-line interface.

pub mod doctor;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::broker::GatewayClient;
use crate::config::{Config, ConnectorKind};
use crate::dispatch::{ChatMessage, InferenceRequest};
use crate::ledger::{Amount, LedgerClient, validate_top_up};
use crate::orchestrator::{Orchestrator, OrchestratorBuilder};
use crate::wallet::{LocalKeyConnector, WalletConnector};

#[derive(Parser, Debug)]
#[command(
    name = "zg-inference",
    version,
    about = "Pay-per-request inference on 0G compute providers"
)]
pub struct Cli {
    /// TOML config file (default: ~/.zg-inference/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Send one message to a provider and print the reply.
    Chat {
        /// Provider address (default: ZG_PROVIDER_ADDRESS).
        #[arg(long, value_name = "ADDR")]
        provider: Option<String>,

        /// System prompt sent before the message.
        #[arg(long, value_name = "TEXT")]
        system: Option<String>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Print the full completion as JSON.
        #[arg(long)]
        json: bool,

        message: String,
    },

    /// Show the prepaid ledger balance.
    Balance,

    /// Deposit OG from the wallet into the ledger.
    TopUp {
        /// Amount in OG, e.g. `0.5`.
        #[arg(value_name = "AMOUNT_OG")]
        amount: String,
    },

    /// Validate configuration and probe the chain RPC and broker bridge.
    Doctor {
        /// Exit non-zero when any check fails.
        #[arg(long)]
        strict: bool,
    },
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Command::Doctor { strict } = cli.command {
        return doctor::run_doctor_command(cli.config.as_deref(), strict).await;
    }

    let config = Config::from_env_with_toml(cli.config.as_deref())
        .context("failed to load configuration")?;
    let gateway = Arc::new(GatewayClient::new(
        config.broker.url.as_str(),
        config.broker.timeout,
    ));
    let orchestrator = build_orchestrator(&config, gateway.clone())?;

    let result = match cli.command {
        Command::Chat {
            provider,
            system,
            temperature,
            max_tokens,
            json,
            message,
        } => {
            let provider = provider.unwrap_or_else(|| config.inference.provider_address.clone());
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(message));
            let mut request = InferenceRequest::new(messages);
            if let Some(temperature) = temperature {
                request = request.with_temperature(temperature);
            }
            if let Some(max_tokens) = max_tokens {
                request = request.with_max_tokens(max_tokens);
            }
            run_chat(&orchestrator, &provider, request, json).await
        }
        Command::Balance => run_balance(&orchestrator, gateway.as_ref()).await,
        Command::TopUp { amount } => run_top_up(&orchestrator, gateway.as_ref(), &amount).await,
        Command::Doctor { .. } => Ok(()),
    };

    orchestrator.disconnect().await;
    result
}

/// Wire the configured connector and the broker bridge into an orchestrator.
pub fn build_orchestrator(
    config: &Config,
    gateway: Arc<GatewayClient>,
) -> anyhow::Result<Orchestrator> {
    let connector: Arc<dyn WalletConnector> = match config.wallet.primary_connector() {
        ConnectorKind::LocalKey => Arc::new(LocalKeyConnector::new(
            config.wallet.private_key.clone(),
        )),
    };

    let orchestrator = OrchestratorBuilder::from_config(config)
        .connector(connector)
        .ledger(gateway.clone())
        .registry(gateway)
        .build()?;
    Ok(orchestrator)
}

async fn run_chat(
    orchestrator: &Orchestrator,
    provider: &str,
    request: InferenceRequest,
    json: bool,
) -> anyhow::Result<()> {
    orchestrator.connect().await?;
    let completion = orchestrator.run_inference(provider, request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&completion)?);
    } else {
        println!("{}", completion.content);
        let verified = match completion.verified {
            Some(true) => "verified",
            Some(false) => "verification FAILED",
            None => "unverified",
        };
        eprintln!(
            "\n[{} via {} | chat {} | {}]",
            completion.model, completion.provider, completion.chat_id, verified
        );
    }
    Ok(())
}

async fn run_balance(orchestrator: &Orchestrator, ledger: &dyn LedgerClient) -> anyhow::Result<()> {
    let address = orchestrator.connect().await?;
    let identity = orchestrator
        .identity()
        .context("wallet disconnected before the balance query")?;

    let balance = match ledger.get_balance(&identity).await {
        Ok(account) => account.total_balance,
        Err(e) if e.is_missing_ledger_account() => Amount::ZERO,
        Err(e) => return Err(e.into()),
    };

    let policy = orchestrator.funding_policy();
    println!("Wallet:    {address}");
    println!("Balance:   {balance}");
    println!(
        "Top-up:    {} when below {}",
        policy.top_up_amount, policy.threshold
    );
    Ok(())
}

async fn run_top_up(
    orchestrator: &Orchestrator,
    ledger: &dyn LedgerClient,
    raw_amount: &str,
) -> anyhow::Result<()> {
    let amount = Amount::parse_og(raw_amount).map_err(|reason| anyhow::anyhow!(reason))?;
    validate_top_up(amount)?;

    orchestrator.connect().await?;
    let identity = orchestrator
        .identity()
        .context("wallet disconnected before the deposit")?;

    ledger.top_up(&identity, amount).await?;
    println!("Deposited {amount} into the ledger for {}", identity.address());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_with_options() {
        let cli = Cli::try_parse_from([
            "zg-inference",
            "--config",
            "/tmp/zg.toml",
            "chat",
            "--provider",
            "0xf07240Efa67755B5311bc75784a061eDB47165Dd",
            "--system",
            "Be brief",
            "--max-tokens",
            "1000",
            "Say hello",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/zg.toml")));
        match cli.command {
            Command::Chat {
                provider,
                system,
                max_tokens,
                temperature,
                json,
                message,
            } => {
                assert_eq!(
                    provider.as_deref(),
                    Some("0xf07240Efa67755B5311bc75784a061eDB47165Dd")
                );
                assert_eq!(system.as_deref(), Some("Be brief"));
                assert_eq!(max_tokens, Some(1000));
                assert_eq!(temperature, None);
                assert!(!json);
                assert_eq!(message, "Say hello");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_top_up_and_doctor() {
        let cli = Cli::try_parse_from(["zg-inference", "top-up", "0.5"]).unwrap();
        assert!(matches!(cli.command, Command::TopUp { ref amount } if amount == "0.5"));

        let cli = Cli::try_parse_from(["zg-inference", "doctor", "--strict"]).unwrap();
        assert!(matches!(cli.command, Command::Doctor { strict: true }));
    }

    #[test]
    fn chat_requires_a_message() {
        assert!(Cli::try_parse_from(["zg-inference", "chat"]).is_err());
    }
}
