//! CLI entry point launching the streamtally service.

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = streamtally::config::CliArgs::parse();
    let config = streamtally::config::AppConfig::load(cli).await?;

    if let Err(error) = streamtally::run(config).await {
        tracing::error!(error = %error, "pipeline execution failed");
        return Err(Box::new(error) as Box<dyn std::error::Error>);
    }

    Ok(())
}
