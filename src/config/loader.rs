//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml structure.
//! Every section and field has a default, so an empty file is a valid config.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::adapters::jito::{endpoints, JitoConfig};
use crate::adapters::jupiter::JupiterConfig;
use crate::adapters::solana::token_account::WSOL_MINT;
use crate::application::exit_cache::{ExitCacheConfig, TierFees, DEFAULT_SLIPPAGE_TIERS_BPS};
use crate::application::ingest::IngestConfig;
use crate::application::monitor::MonitorConfig;
use crate::application::orchestrator::OrchestratorConfig;
use crate::application::priority_sender::SenderConfig;
use crate::domain::membership_filter::{DEFAULT_EXPECTED_ITEMS, DEFAULT_FALSE_POSITIVE_RATE};
use crate::domain::{MembershipFilter, Severity, VelocityThresholds};
use crate::gateway::{BackoffPolicy, BatchConfig, GuardConfig};
use crate::matcher::{PoolConfig, DEFAULT_LARGE_SWAP_MIN_AMOUNT};

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub solana: SolanaSection,
    pub gateway: GatewaySection,
    pub batch: BatchSection,
    pub matcher: MatcherSection,
    pub velocity: VelocitySection,
    pub exit: ExitSection,
    pub sender: SenderSection,
    pub orchestrator: OrchestratorSection,
    pub monitor: MonitorSection,
    pub jupiter: JupiterSection,
    pub jito: JitoSection,
    pub store: StoreSection,
    pub alerts: AlertsSection,
    pub logging: LoggingSection,
}

/// Solana RPC configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SolanaSection {
    /// RPC endpoint (use private RPC for production)
    pub rpc_url: String,
    /// Websocket endpoint for log subscriptions
    pub ws_url: String,
    /// Exits are sent raw; preflight only adds latency
    pub skip_preflight: bool,
    /// Provider limit for getMultipleAccounts
    pub max_accounts_per_call: usize,
}

impl Default for SolanaSection {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
            skip_preflight: true,
            max_accounts_per_call: 100,
        }
    }
}

/// Quota, concurrency and breaker settings shared by the RPC and trade guards
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub requests_per_minute: u32,
    pub burst: u32,
    /// Jupiter's free tier allows 60 RPM
    pub trade_requests_per_minute: u32,
    pub max_concurrency: usize,
    pub failure_threshold: u32,
    pub cooldown_secs: u64,
    pub call_timeout_ms: u64,
    pub max_queue_wait_ms: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
            burst: 20,
            trade_requests_per_minute: 60,
            max_concurrency: 16,
            failure_threshold: 5,
            cooldown_secs: 30,
            call_timeout_ms: 5_000,
            max_queue_wait_ms: 2_000,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2_000,
            max_attempts: 3,
        }
    }
}

impl GatewaySection {
    fn guard(&self, requests_per_minute: u32) -> GuardConfig {
        GuardConfig {
            requests_per_minute,
            burst: self.burst,
            max_concurrency: self.max_concurrency,
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            max_queue_wait: Duration::from_millis(self.max_queue_wait_ms),
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.retry_base_delay_ms),
                Duration::from_millis(self.retry_max_delay_ms),
                self.max_attempts,
            ),
        }
    }

    pub fn rpc_guard(&self) -> GuardConfig {
        self.guard(self.requests_per_minute)
    }

    pub fn trade_guard(&self) -> GuardConfig {
        self.guard(self.trade_requests_per_minute)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub flush_interval_ms: u64,
    pub max_batch_size: usize,
    pub max_wait_ms: u64,
    pub fanout_concurrency: usize,
    pub queue_capacity: usize,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            flush_interval_ms: 20,
            max_batch_size: 100,
            max_wait_ms: 50,
            fanout_concurrency: 8,
            queue_capacity: 4_096,
        }
    }
}

impl From<&BatchSection> for BatchConfig {
    fn from(section: &BatchSection) -> Self {
        BatchConfig {
            flush_interval: Duration::from_millis(section.flush_interval_ms),
            max_batch_size: section.max_batch_size,
            max_wait: Duration::from_millis(section.max_wait_ms),
            fanout_concurrency: section.fanout_concurrency,
            queue_capacity: section.queue_capacity,
        }
    }
}

/// Threat matcher pool and the ingestion loop in front of it
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherSection {
    pub workers: usize,
    pub batch_size: usize,
    pub batch_budget_ms: u64,
    pub max_queued: usize,
    pub result_capacity: usize,
    /// Raw token amount above which a swap counts as large
    pub large_swap_min_amount: u64,
    pub channel_capacity: usize,
    pub max_ingest_batch: usize,
}

impl Default for MatcherSection {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10,
            batch_budget_ms: 100,
            max_queued: 10_000,
            result_capacity: 1_024,
            large_swap_min_amount: DEFAULT_LARGE_SWAP_MIN_AMOUNT,
            channel_capacity: 4_096,
            max_ingest_batch: 64,
        }
    }
}

impl From<&MatcherSection> for PoolConfig {
    fn from(section: &MatcherSection) -> Self {
        PoolConfig {
            workers: section.workers,
            batch_size: section.batch_size,
            batch_budget: Duration::from_millis(section.batch_budget_ms),
            max_queued: section.max_queued,
            result_capacity: section.result_capacity,
        }
    }
}

impl From<&MatcherSection> for IngestConfig {
    fn from(section: &MatcherSection) -> Self {
        IngestConfig {
            channel_capacity: section.channel_capacity,
            max_batch: section.max_ingest_batch,
        }
    }
}

/// Drop percentages are positive numbers (50.0 = a 50% drop)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VelocitySection {
    pub flash_rug_drop_pct: f64,
    pub rapid_drain_drop_pct: f64,
    pub slow_bleed_drop_pct: f64,
    pub volume_spike_multiplier: f64,
    pub retention_minutes: u64,
}

impl Default for VelocitySection {
    fn default() -> Self {
        let t = VelocityThresholds::default();
        Self {
            flash_rug_drop_pct: t.flash_rug_drop_pct,
            rapid_drain_drop_pct: t.rapid_drain_drop_pct,
            slow_bleed_drop_pct: t.slow_bleed_drop_pct,
            volume_spike_multiplier: t.volume_spike_multiplier,
            retention_minutes: t.retention_ms / 60_000,
        }
    }
}

impl From<&VelocitySection> for VelocityThresholds {
    fn from(section: &VelocitySection) -> Self {
        VelocityThresholds {
            flash_rug_drop_pct: section.flash_rug_drop_pct,
            rapid_drain_drop_pct: section.rapid_drain_drop_pct,
            slow_bleed_drop_pct: section.slow_bleed_drop_pct,
            volume_spike_multiplier: section.volume_spike_multiplier,
            retention_ms: section.retention_minutes.saturating_mul(60_000),
        }
    }
}

/// Exit-transaction cache
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExitSection {
    pub slippage_tiers_bps: Vec<u16>,
    pub ttl_secs: u64,
    pub standard_fee_lamports: u64,
    pub elevated_fee_lamports: u64,
    pub urgent_fee_lamports: u64,
    /// Pay the urgent tier as a Jito tip instead of a priority fee
    pub jito_tip_enabled: bool,
    pub refresh_concurrency: usize,
    pub output_mint: String,
}

impl Default for ExitSection {
    fn default() -> Self {
        let fees = TierFees::default();
        Self {
            slippage_tiers_bps: DEFAULT_SLIPPAGE_TIERS_BPS.to_vec(),
            ttl_secs: 30,
            standard_fee_lamports: fees.standard_lamports,
            elevated_fee_lamports: fees.elevated_lamports,
            urgent_fee_lamports: fees.urgent_lamports,
            jito_tip_enabled: false,
            refresh_concurrency: 8,
            output_mint: WSOL_MINT.to_string(),
        }
    }
}

impl From<&ExitSection> for ExitCacheConfig {
    fn from(section: &ExitSection) -> Self {
        ExitCacheConfig {
            slippage_tiers_bps: section.slippage_tiers_bps.clone(),
            ttl: Duration::from_secs(section.ttl_secs),
            fees: TierFees {
                standard_lamports: section.standard_fee_lamports,
                elevated_lamports: section.elevated_fee_lamports,
                urgent_lamports: section.urgent_fee_lamports,
            },
            jito_tip_enabled: section.jito_tip_enabled,
            refresh_concurrency: section.refresh_concurrency,
            output_mint: section.output_mint.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SenderSection {
    pub confirmation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub bundle_on_critical: bool,
    pub submitted_retention_secs: u64,
}

impl Default for SenderSection {
    fn default() -> Self {
        Self {
            confirmation_timeout_secs: 30,
            poll_interval_ms: 400,
            bundle_on_critical: true,
            submitted_retention_secs: 120,
        }
    }
}

impl From<&SenderSection> for SenderConfig {
    fn from(section: &SenderSection) -> Self {
        SenderConfig {
            confirmation_timeout: Duration::from_secs(section.confirmation_timeout_secs),
            poll_interval: Duration::from_millis(section.poll_interval_ms),
            bundle_on_critical: section.bundle_on_critical,
            submitted_retention: Duration::from_secs(section.submitted_retention_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// "low", "medium", "high" or "critical"
    pub severity_threshold: Severity,
    pub dedup_ttl_secs: u64,
    pub expired_rebuilds: u32,
    pub warm_on_enable: bool,
    pub max_concurrent_triggers: usize,
    /// Membership filter sizing
    pub filter_expected_items: usize,
    pub filter_false_positive_rate: f64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            severity_threshold: Severity::Medium,
            dedup_ttl_secs: 60,
            expired_rebuilds: 1,
            warm_on_enable: true,
            max_concurrent_triggers: 32,
            filter_expected_items: DEFAULT_EXPECTED_ITEMS,
            filter_false_positive_rate: DEFAULT_FALSE_POSITIVE_RATE,
        }
    }
}

impl OrchestratorSection {
    pub fn filter(&self) -> MembershipFilter {
        MembershipFilter::with_capacity(self.filter_expected_items, self.filter_false_positive_rate)
    }
}

impl From<&OrchestratorSection> for OrchestratorConfig {
    fn from(section: &OrchestratorSection) -> Self {
        OrchestratorConfig {
            severity_threshold: section.severity_threshold,
            dedup_ttl: Duration::from_secs(section.dedup_ttl_secs),
            expired_rebuilds: section.expired_rebuilds,
            warm_on_enable: section.warm_on_enable,
            max_concurrent_triggers: section.max_concurrent_triggers,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub sample_interval_secs: u64,
    pub cache_refresh_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub subscription_sync_interval_secs: u64,
    pub sample_concurrency: usize,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            sample_interval_secs: 15,
            cache_refresh_interval_secs: 20,
            reconcile_interval_secs: 30,
            subscription_sync_interval_secs: 30,
            sample_concurrency: 8,
        }
    }
}

impl From<&MonitorSection> for MonitorConfig {
    fn from(section: &MonitorSection) -> Self {
        MonitorConfig {
            sample_interval: Duration::from_secs(section.sample_interval_secs),
            cache_refresh_interval: Duration::from_secs(section.cache_refresh_interval_secs),
            reconcile_interval: Duration::from_secs(section.reconcile_interval_secs),
            sample_concurrency: section.sample_concurrency,
        }
    }
}

/// Jupiter API configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JupiterSection {
    /// Jupiter swap API base URL
    pub api_url: String,
    /// Optional API key for higher rate limits (get from jup.ag)
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    /// Restrict intermediate tokens to high-liquidity paths
    pub restrict_intermediate_tokens: bool,
    /// Use dynamic compute unit limits
    pub dynamic_compute_units: bool,
}

impl Default for JupiterSection {
    fn default() -> Self {
        let defaults = JupiterConfig::default();
        Self {
            api_url: defaults.api_base_url,
            api_key: None,
            timeout_secs: defaults.timeout.as_secs(),
            restrict_intermediate_tokens: defaults.restrict_intermediate_tokens,
            dynamic_compute_units: defaults.dynamic_compute_units,
        }
    }
}

impl JupiterSection {
    /// API key, treating an empty string as unset
    pub fn get_api_key(&self) -> Option<String> {
        self.api_key.clone().filter(|k| !k.is_empty())
    }
}

impl From<&JupiterSection> for JupiterConfig {
    fn from(section: &JupiterSection) -> Self {
        JupiterConfig {
            api_base_url: section.api_url.clone(),
            api_key: section.get_api_key(),
            timeout: Duration::from_secs(section.timeout_secs),
            restrict_intermediate_tokens: section.restrict_intermediate_tokens,
            dynamic_compute_units: section.dynamic_compute_units,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JitoSection {
    /// Mirror critical exits to the block engine
    pub enabled: bool,
    pub block_engine_url: String,
    pub api_token: Option<String>,
    pub timeout_ms: u64,
}

impl Default for JitoSection {
    fn default() -> Self {
        Self {
            enabled: false,
            block_engine_url: endpoints::MAINNET_DEFAULT.to_string(),
            api_token: None,
            timeout_ms: 5_000,
        }
    }
}

impl From<&JitoSection> for JitoConfig {
    fn from(section: &JitoSection) -> Self {
        JitoConfig {
            block_engine_url: section.block_engine_url.clone(),
            timeout: Duration::from_millis(section.timeout_ms),
            api_token: section.api_token.clone().filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Positions, audit log and velocity history
    pub data_dir: String,
    /// One `<wallet>.json` keypair file per protected wallet
    pub keystore_dir: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            data_dir: "~/.rugguard/data".to_string(),
            keystore_dir: "~/.rugguard/keys".to_string(),
        }
    }
}

impl StoreSection {
    pub fn data_path(&self) -> PathBuf {
        expand_path(&self.data_dir)
    }

    pub fn keystore_path(&self) -> PathBuf {
        expand_path(&self.keystore_dir)
    }
}

/// Alerts configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsSection {
    /// Always log alerts, even when another sink is configured
    pub log_alerts: bool,
    /// Enable Telegram notifications
    pub telegram_enabled: bool,
    /// Telegram bot token
    pub telegram_bot_token: String,
    /// Telegram chat ID
    pub telegram_chat_id: String,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            log_alerts: true,
            telegram_enabled: false,
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Expand `~` and environment variables; unexpandable paths are used as is
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(path).as_ref()),
    }
}

/// Load configuration from a TOML file, apply environment overrides, validate
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;
    config.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
    config.validate()?;
    Ok(config)
}

fn invalid(msg: String) -> Result<(), ConfigError> {
    Err(ConfigError::ValidationError(msg))
}

impl Config {
    /// Environment wins over the file for endpoints and secrets
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SOLANA_RPC_URL") {
            self.solana.rpc_url = v;
        }
        if let Some(v) = lookup("SOLANA_WS_URL") {
            self.solana.ws_url = v;
        }
        if let Some(v) = lookup("RUGGUARD_KEYSTORE_DIR") {
            self.store.keystore_dir = v;
        }
        if let Some(v) = lookup("JUPITER_API_KEY") {
            self.jupiter.api_key = Some(v);
        }
        if let Some(v) = lookup("TELEGRAM_BOT_TOKEN") {
            self.alerts.telegram_bot_token = v;
        }
        if let Some(v) = lookup("TELEGRAM_CHAT_ID") {
            self.alerts.telegram_chat_id = v;
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.solana.rpc_url.is_empty() {
            return invalid("solana.rpc_url must be set".to_string());
        }
        if self.solana.max_accounts_per_call == 0 {
            return invalid("solana.max_accounts_per_call must be > 0".to_string());
        }

        let g = &self.gateway;
        if g.requests_per_minute == 0 || g.trade_requests_per_minute == 0 {
            return invalid("gateway request quotas must be > 0".to_string());
        }
        if g.burst == 0 {
            return invalid("gateway.burst must be > 0".to_string());
        }
        if g.max_concurrency == 0 {
            return invalid("gateway.max_concurrency must be > 0".to_string());
        }
        if g.failure_threshold == 0 {
            return invalid("gateway.failure_threshold must be > 0".to_string());
        }
        if g.max_attempts == 0 {
            return invalid("gateway.max_attempts must be >= 1".to_string());
        }
        if g.retry_base_delay_ms > g.retry_max_delay_ms {
            return invalid(format!(
                "gateway.retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                g.retry_base_delay_ms, g.retry_max_delay_ms
            ));
        }

        if self.batch.max_batch_size == 0 || self.batch.fanout_concurrency == 0 || self.batch.queue_capacity == 0 {
            return invalid("batch sizes and concurrency must be > 0".to_string());
        }
        if self.batch.max_wait_ms < self.batch.flush_interval_ms {
            return invalid(format!(
                "batch.max_wait_ms ({}) must be >= flush_interval_ms ({})",
                self.batch.max_wait_ms, self.batch.flush_interval_ms
            ));
        }

        let m = &self.matcher;
        if m.workers == 0 || m.batch_size == 0 || m.max_queued == 0 || m.result_capacity == 0 {
            return invalid("matcher workers, batch size and queue sizes must be > 0".to_string());
        }

        let v = &self.velocity;
        for (name, pct) in [
            ("flash_rug_drop_pct", v.flash_rug_drop_pct),
            ("rapid_drain_drop_pct", v.rapid_drain_drop_pct),
            ("slow_bleed_drop_pct", v.slow_bleed_drop_pct),
        ] {
            if !(pct > 0.0 && pct <= 100.0) {
                return invalid(format!("velocity.{} must be in (0, 100], got {}", name, pct));
            }
        }
        if v.volume_spike_multiplier <= 1.0 {
            return invalid(format!(
                "velocity.volume_spike_multiplier must be > 1, got {}",
                v.volume_spike_multiplier
            ));
        }
        if v.retention_minutes < 30 {
            return invalid("velocity.retention_minutes must cover the 30m window".to_string());
        }

        if self.exit.slippage_tiers_bps.is_empty() {
            return invalid("exit.slippage_tiers_bps must not be empty".to_string());
        }
        if let Some(bad) = self.exit.slippage_tiers_bps.iter().find(|b| !(1..=10_000).contains(*b)) {
            return invalid(format!("exit.slippage_tiers_bps entry {} outside 1..=10000", bad));
        }
        if self.exit.ttl_secs == 0 || self.exit.refresh_concurrency == 0 {
            return invalid("exit.ttl_secs and exit.refresh_concurrency must be > 0".to_string());
        }
        if self.exit.output_mint.is_empty() {
            return invalid("exit.output_mint must be set".to_string());
        }

        if self.sender.confirmation_timeout_secs == 0 || self.sender.poll_interval_ms == 0 {
            return invalid("sender timeout and poll interval must be > 0".to_string());
        }

        let o = &self.orchestrator;
        if o.dedup_ttl_secs == 0 {
            return invalid("orchestrator.dedup_ttl_secs must be > 0".to_string());
        }
        if o.filter_expected_items == 0 {
            return invalid("orchestrator.filter_expected_items must be > 0".to_string());
        }
        if o.max_concurrent_triggers == 0 {
            return invalid("orchestrator.max_concurrent_triggers must be > 0".to_string());
        }
        if !(o.filter_false_positive_rate > 0.0 && o.filter_false_positive_rate < 1.0) {
            return invalid(format!(
                "orchestrator.filter_false_positive_rate must be in (0, 1), got {}",
                o.filter_false_positive_rate
            ));
        }

        let mon = &self.monitor;
        if mon.sample_interval_secs == 0
            || mon.cache_refresh_interval_secs == 0
            || mon.reconcile_interval_secs == 0
            || mon.subscription_sync_interval_secs == 0
        {
            return invalid("monitor intervals must be > 0".to_string());
        }
        if mon.sample_concurrency == 0 {
            return invalid("monitor.sample_concurrency must be > 0".to_string());
        }

        if self.jito.enabled && self.jito.block_engine_url.is_empty() {
            return invalid("jito.block_engine_url must be set when jito is enabled".to_string());
        }

        if self.alerts.telegram_enabled
            && (self.alerts.telegram_bot_token.is_empty() || self.alerts.telegram_chat_id.is_empty())
        {
            return invalid("telegram alerts need telegram_bot_token and telegram_chat_id".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return invalid(format!(
                "logging.level must be one of {:?}, got {}",
                valid_levels, self.logging.level
            ));
        }

        Ok(())
    }
}
