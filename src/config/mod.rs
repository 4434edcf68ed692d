//! Configuration Module
//!
//! Loads and validates configuration from TOML files.

pub mod loader;

pub use loader::{
    expand_path, load_config, AlertsSection, Config, ConfigError, ExitSection, GatewaySection, JitoSection,
    JupiterSection, LoggingSection, MonitorSection, OrchestratorSection, SolanaSection, StoreSection,
};
