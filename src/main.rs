use clap::Parser;
use tracing_subscriber::EnvFilter;

use zg_inference::cli::{Cli, run};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env files before the log filter reads RUST_LOG.
    zg_inference::bootstrap::load_zg_env();
    init_tracing();

    let cli = Cli::parse();
    run(cli).await
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zg_inference=info"));
    let json = std::env::var("ZG_LOG_JSON")
        .map(|v| matches!(v.trim(), "1" | "true"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}
