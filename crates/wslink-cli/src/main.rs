//! wslink - interactive WebSocket client.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Interactive WebSocket client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via WSLINK_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Address to connect to, overriding the configuration file
    #[arg(short, long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    wslink_ws::init_crypto();

    let args = Args::parse();

    wslink_telemetry::init_logging()?;

    info!("Starting wslink v{}", env!("CARGO_PKG_VERSION"));

    // Determine config path: CLI arg > WSLINK_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("WSLINK_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let mut config = wslink_cli::AppConfig::from_file(&config_path)?;
    if let Some(address) = args.address {
        config.connection.address = address;
    }
    info!(
        address = %config.connection.address,
        reconnect = config.reconnect.enabled,
        max_attempts = config.reconnect.max_attempts,
        "Configuration loaded"
    );

    let app = wslink_cli::Application::new(config)?;
    app.run().await?;

    info!("Session ended");
    Ok(())
}
