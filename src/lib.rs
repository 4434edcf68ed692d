//! RugGuard - rug-pull protection for Solana token positions
//!
//! Protected (token, wallet) positions are watched through a log stream
//! and periodic market samples. When a threat is matched, the position is
//! exited with a pre-built, usually pre-signed, swap transaction.
//!
//! # Modules
//!
//! - `domain`: Positions, threats, velocity analytics, membership filter, circuit breaker
//! - `ports`: Trait abstractions (ChainRpc, TradeBuilder, KeyCustody, ProtectionStore, ...)
//! - `gateway`: Rate-limited, retried and breaker-guarded RPC access with batching
//! - `matcher`: Threat rules and the matcher worker pool
//! - `adapters`: External implementations (Solana, Jupiter, Jito, DexScreener, Telegram, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Exit cache, priority sender, orchestrator, monitor and ingest

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod matcher;
pub mod ports;
