//! CLI Command Handlers
//!
//! Control surface for the protection service. `run` starts the reactive
//! pipeline and the monitor; the other commands act on the durable store
//! and exit.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::solana::{read_keypair_file, KeystoreCustody};
use crate::application::{production_stream, AppContext};
use crate::config::Config;
use crate::domain::{ProtectedPosition, ProtectionLevel};
use crate::ports::custody::KeyCustody;
use crate::ports::market::MarketDataSource;
use crate::ports::store::ProtectionStore;
use solana_sdk::signer::Signer;

/// Shutdown grace for the pipeline loops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// RugGuard - rug-pull protection for Solana token positions
#[derive(Parser, Debug)]
#[command(
    name = "rugguard",
    version = env!("CARGO_PKG_VERSION"),
    about = "Rug-pull protection for Solana token positions",
    long_about = "RugGuard watches protected token positions for rug-pull signals and exits \
                  them with pre-built, pre-signed transactions when a threat is detected."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the protection service
    Run(RunCmd),

    /// Protect a (token, wallet) position
    Enable(EnableCmd),

    /// Stop protecting a position
    Disable(PositionCmd),

    /// Temporarily stop monitoring a position
    Pause(PositionCmd),

    /// Resume monitoring a paused position
    Resume(PositionCmd),

    /// Show positions and service health
    Status(StatusCmd),

    /// Sample market data and print velocity for a token
    Velocity(VelocityCmd),

    /// Rebuild cached exit transactions
    Refresh(RefreshCmd),
}

impl Command {
    pub fn config_path(&self) -> &Path {
        match self {
            Command::Run(cmd) => &cmd.config,
            Command::Enable(cmd) => &cmd.config,
            Command::Disable(cmd) | Command::Pause(cmd) | Command::Resume(cmd) => &cmd.config,
            Command::Status(cmd) => &cmd.config,
            Command::Velocity(cmd) => &cmd.config,
            Command::Refresh(cmd) => &cmd.config,
        }
    }
}

#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct EnableCmd {
    /// Token mint address
    #[arg(value_name = "TOKEN")]
    pub token: String,

    /// Wallet address holding the position
    #[arg(value_name = "WALLET")]
    pub wallet: String,

    /// Protection level (automatic, manual)
    #[arg(short, long, default_value = "automatic")]
    pub level: String,

    /// Demo position: exits are simulated, nothing is sent
    #[arg(long)]
    pub demo: bool,

    /// Import the wallet keypair from a Solana keypair file
    #[arg(long, value_name = "FILE")]
    pub import_key: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct PositionCmd {
    /// Token mint address
    #[arg(value_name = "TOKEN")]
    pub token: String,

    /// Wallet address holding the position
    #[arg(value_name = "WALLET")]
    pub wallet: String,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Limit to one token
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Limit to one wallet (with --token)
    #[arg(long, value_name = "WALLET", requires = "token")]
    pub wallet: Option<String>,

    /// Output format (text, json)
    #[arg(short, long, value_name = "FORMAT", default_value = "text")]
    pub format: String,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct VelocityCmd {
    /// Token mint address
    #[arg(value_name = "TOKEN")]
    pub token: String,

    /// Number of samples to take
    #[arg(short, long, default_value = "3")]
    pub samples: u32,

    /// Seconds between samples
    #[arg(short, long, default_value = "20")]
    pub interval: u64,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct RefreshCmd {
    /// Only refresh positions on this token
    #[arg(value_name = "TOKEN")]
    pub token: Option<String>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}

/// Execute a parsed command against a loaded config
pub async fn execute(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Run(_) => run_command(config).await,
        Command::Enable(cmd) => enable_command(cmd, config).await,
        Command::Disable(cmd) => disable_command(cmd, config).await,
        Command::Pause(cmd) => pause_command(cmd, config).await,
        Command::Resume(cmd) => resume_command(cmd, config).await,
        Command::Status(cmd) => status_command(cmd, config).await,
        Command::Velocity(cmd) => velocity_command(cmd, config).await,
        Command::Refresh(cmd) => refresh_command(cmd, config).await,
    }
}

async fn context(config: Config) -> Result<AppContext> {
    AppContext::build(config).await.context("Failed to initialize services")
}

fn print_position(position: &ProtectedPosition) {
    println!("  {}", position.key());
    println!(
        "    level={} status={} active={} demo={} triggers={}",
        position.level, position.status, position.is_active, position.is_demo, position.trigger_count
    );
    if let Some(signature) = &position.exit_signature {
        println!("    exit: {}", signature);
    }
}

async fn run_command(config: Config) -> Result<()> {
    tracing::info!("🛡️  Starting RugGuard protection service");
    tracing::info!("RPC: {} | WS: {}", config.solana.rpc_url, config.solana.ws_url);

    let stream = production_stream(&config);
    let ctx = context(config).await?;
    let services = ctx.start(stream).await.context("Failed to start services")?;

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown signal received");

    services.shutdown(SHUTDOWN_GRACE).await;
    ctx.alerts.drain().await;

    let counters = ctx.orchestrator.counters();
    tracing::info!(
        "Stopped. triggers={} executed={} failed={} timed_out={} missing_keys={}",
        counters.triggers,
        counters.executed,
        counters.failed,
        counters.timed_out,
        counters.missing_keys
    );
    Ok(())
}

async fn enable_command(cmd: EnableCmd, config: Config) -> Result<()> {
    let level: ProtectionLevel = cmd.level.parse()?;

    if let Some(path) = &cmd.import_key {
        let keypair = read_keypair_file(path).with_context(|| format!("Failed to read {}", path.display()))?;
        if keypair.pubkey().to_string() != cmd.wallet {
            bail!("Keypair {} does not match wallet {}", keypair.pubkey(), cmd.wallet);
        }
        let keystore = KeystoreCustody::new(config.store.keystore_path());
        let stored = keystore.import(&keypair).context("Failed to import keypair")?;
        println!("✓ Key imported to {}", stored.display());
    }

    let ctx = context(config).await?;
    let position = ctx
        .orchestrator
        .enable_protection(&cmd.token, &cmd.wallet, level, cmd.demo)
        .await?;

    if level == ProtectionLevel::Automatic && !cmd.demo && !ctx.custody.has_key(&cmd.wallet).await {
        println!("⚠ No signing key for {}; automatic exits will fail until one is imported", cmd.wallet);
    }
    ctx.alerts.drain().await;

    println!("✓ Protection enabled");
    print_position(&position);
    Ok(())
}

async fn disable_command(cmd: PositionCmd, config: Config) -> Result<()> {
    let ctx = context(config).await?;
    let position = ctx.orchestrator.disable_protection(&cmd.token, &cmd.wallet).await?;
    println!("✓ Protection disabled");
    print_position(&position);
    Ok(())
}

async fn pause_command(cmd: PositionCmd, config: Config) -> Result<()> {
    let ctx = context(config).await?;
    let position = ctx.orchestrator.pause_protection(&cmd.token, &cmd.wallet).await?;
    println!("✓ Protection paused");
    print_position(&position);
    Ok(())
}

async fn resume_command(cmd: PositionCmd, config: Config) -> Result<()> {
    let ctx = context(config).await?;
    let position = ctx.orchestrator.resume_protection(&cmd.token, &cmd.wallet).await?;
    println!("✓ Protection resumed");
    print_position(&position);
    Ok(())
}

async fn status_command(cmd: StatusCmd, config: Config) -> Result<()> {
    let ctx = context(config).await?;
    ctx.orchestrator.rebuild_filter().await?;

    if let (Some(token), Some(wallet)) = (&cmd.token, &cmd.wallet) {
        let Some(report) = ctx.orchestrator.position_status(token, wallet).await? else {
            bail!("No protection for {}:{}", token, wallet);
        };
        if cmd.format == "json" {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_position(&report.position);
            println!(
                "    cached exits={} presigned={} age={}",
                report.cached_variants,
                report.presigned,
                report.cache_age_ms.map(|ms| format!("{}ms", ms)).unwrap_or_else(|| "-".to_string())
            );
        }
        return Ok(());
    }

    let positions: Vec<ProtectedPosition> = match &cmd.token {
        Some(token) => ctx.store.get_active_positions_for_token(token).await?,
        None => ctx.store.list_active_positions().await?,
    };
    let status = ctx.orchestrator.monitoring_status();

    match cmd.format.as_str() {
        "json" => {
            let body = serde_json::json!({ "positions": positions, "monitoring": status });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        _ => {
            println!("RugGuard status");
            println!(
                "  gateway: {} ({:?}){}",
                status.gateway.name,
                status.gateway.breaker.state,
                if status.degraded { " DEGRADED" } else { "" }
            );
            println!(
                "  filter: {} items, est. fpr {:.4}",
                status.filter.items, status.filter.estimated_false_positive_rate
            );
            println!("  active positions: {}", positions.len());
            for position in &positions {
                print_position(position);
            }
        }
    }
    Ok(())
}

async fn velocity_command(cmd: VelocityCmd, config: Config) -> Result<()> {
    let ctx = context(config).await?;
    let samples = cmd.samples.max(1);

    for i in 0..samples {
        if i > 0 {
            tokio::time::sleep(Duration::from_secs(cmd.interval)).await;
        }
        let sample = ctx
            .market
            .sample(&cmd.token)
            .await
            .with_context(|| format!("Market data for {}", cmd.token))?;
        let snapshot = ctx.tracker.record(&cmd.token, sample)?;
        println!(
            "[{}/{}] price={:.10} liquidity=${:.0} volume5m=${:.0}",
            i + 1,
            samples,
            snapshot.latest.price,
            snapshot.latest.liquidity,
            snapshot.latest.volume
        );
    }

    let Some(snapshot) = ctx.tracker.snapshot(&cmd.token) else {
        bail!("No samples recorded for {}", cmd.token);
    };
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    if snapshot.needs_immediate_check() {
        println!("⚠ Velocity alerts: {}", snapshot.alerts.flags().join(", "));
    }
    Ok(())
}

async fn refresh_command(cmd: RefreshCmd, config: Config) -> Result<()> {
    let ctx = context(config).await?;
    let summary = match &cmd.token {
        Some(token) => ctx.orchestrator.force_refresh(token).await?,
        None => ctx.orchestrator.refresh_all_caches().await?,
    };
    println!(
        "✓ Refreshed {} positions ({} with no balance, {} failed)",
        summary.refreshed, summary.empty, summary.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enable_parses_flags() {
        let app = CliApp::try_parse_from([
            "rugguard", "enable", "Mint1", "Wallet1", "--level", "manual", "--demo", "-c", "guard.toml",
        ])
        .unwrap();
        match &app.command {
            Command::Enable(cmd) => {
                assert_eq!(cmd.token, "Mint1");
                assert_eq!(cmd.wallet, "Wallet1");
                assert_eq!(cmd.level, "manual");
                assert!(cmd.demo);
                assert!(cmd.import_key.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(app.command.config_path(), Path::new("guard.toml"));
    }

    #[test]
    fn test_global_flags_and_default_config() {
        let app = CliApp::try_parse_from(["rugguard", "status", "--debug"]).unwrap();
        assert!(app.debug);
        assert!(!app.verbose);
        assert_eq!(app.command.config_path(), Path::new("config.toml"));
    }

    #[test]
    fn test_status_wallet_requires_token() {
        assert!(CliApp::try_parse_from(["rugguard", "status", "--wallet", "W"]).is_err());
    }

    #[test]
    fn test_refresh_token_optional() {
        let app = CliApp::try_parse_from(["rugguard", "refresh"]).unwrap();
        assert!(matches!(app.command, Command::Refresh(RefreshCmd { token: None, .. })));
    }
}
