//! Trade builder port
//!
//! Prices the exit and builds a signable transaction. The aggregator is an
//! unreliable remote dependency, so errors carry a retry classification
//! for the call guard.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::transaction::VersionedTransaction;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TradeError {
    #[error("API request failed: {0}")]
    ApiError(String),
    #[error("Rate limited by aggregator")]
    RateLimited,
    #[error("Request timed out")]
    Timeout,
    #[error("No route: {0}")]
    NoRoute(String),
    #[error("Slippage tolerance exceeded")]
    SlippageExceeded,
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("Failed to decode transaction: {0}")]
    DecodeError(String),
}

impl TradeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TradeError::ApiError(_) | TradeError::RateLimited | TradeError::Timeout)
    }
}

/// Quote for selling the full position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitQuote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub slippage_bps: u16,
    /// Human-readable route, e.g. "Raydium -> Orca"
    pub route: String,
    /// Aggregator-specific quote payload, passed back on build
    pub raw: serde_json::Value,
}

/// Priority fee attached at build time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFee {
    pub lamports: u64,
    /// Pay the fee as a Jito tip instead of a compute-unit price
    pub as_jito_tip: bool,
}

impl PriorityFee {
    pub fn compute_unit(lamports: u64) -> Self {
        Self {
            lamports,
            as_jito_tip: false,
        }
    }

    pub fn jito_tip(lamports: u64) -> Self {
        Self {
            lamports,
            as_jito_tip: true,
        }
    }
}

/// Unsigned transaction from the builder
#[derive(Debug, Clone)]
pub struct UnsignedExit {
    pub transaction: VersionedTransaction,
    pub last_valid_block_height: u64,
    pub priority_fee: PriorityFee,
}

#[async_trait]
pub trait TradeBuilder: Send + Sync {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u16,
    ) -> Result<ExitQuote, TradeError>;

    async fn build_transaction(
        &self,
        quote: &ExitQuote,
        wallet: &str,
        priority_fee: PriorityFee,
    ) -> Result<UnsignedExit, TradeError>;
}
