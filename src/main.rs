//! RugGuard - rug-pull protection for Solana token positions
//!
//! Watches protected positions and exits them with pre-built transactions
//! when a threat or a velocity collapse is detected.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use rugguard::adapters::cli::{self, CliApp};
use rugguard::config::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets go in .env, not in config.toml
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    let config_path = app.command.config_path().to_path_buf();
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;

    init_logging(app.verbose, app.debug, &config.logging.level)?;
    tracing::debug!("Loaded config from {}", config_path.display());

    cli::execute(app.command, config).await
}

/// RUST_LOG wins, then the CLI flags, then `logging.level`
fn init_logging(verbose: bool, debug: bool, default_level: &str) -> Result<()> {
    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        default_level
    };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    Ok(())
}
