use anyhow::{Context, Result};
use asu_notifier::{run, AppConfig, Cli};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::resolve(&cli).context("failed to resolve configuration")?;

    run(&config).await.context("notifier loop terminated")?;
    Ok(())
}
