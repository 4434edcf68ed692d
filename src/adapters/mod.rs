//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Jupiter: exit quotes and unsigned swap transactions
//! - Jito: bundle submission for critical exits
//! - Solana: RPC client, log subscriptions and keypair custody
//! - Store: JSON file persistence for positions and audit events
//! - Alerts: Telegram and log sinks
//! - Market Data: DexScreener price, liquidity and volume samples
//! - CLI: Command-line interface handlers

pub mod alerts;
pub mod cli;
pub mod jito;
pub mod jupiter;
pub mod market_data;
pub mod solana;
pub mod store;

pub use alerts::{LogAlertSink, TelegramAlertSink};
pub use cli::CliApp;
pub use jito::JitoBundleClient;
pub use jupiter::JupiterClient;
pub use market_data::DexScreenerClient;
pub use solana::{KeystoreCustody, SolanaClient, SolanaLogStream};
pub use store::JsonFileStore;
