//! Blockchain RPC port
//!
//! Read operations, raw submission, and signature status. Every read goes
//! through the gateway; implementations only translate provider errors
//! into `ChainError` so the gateway can decide what is retryable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default provider limit for `getMultipleAccounts`
pub const DEFAULT_MAX_ACCOUNTS_PER_CALL: usize = 100;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited by provider")]
    RateLimited,

    #[error("Provider error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Blockhash expired or not found")]
    BlockhashExpired,
}

impl ChainError {
    /// Transient errors are retried by the gateway and count toward the
    /// circuit breaker
    pub fn is_retryable(&self) -> bool {
        match self {
            ChainError::Transport(_) | ChainError::RateLimited | ChainError::Timeout => true,
            ChainError::ServerError { status, .. } => *status >= 500 || *status == 429,
            ChainError::InvalidParams(_) | ChainError::Rejected(_) | ChainError::BlockhashExpired => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountData {
    pub pubkey: String,
    pub lamports: u64,
    pub owner: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    pub err: Option<String>,
    pub block_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockhashInfo {
    pub blockhash: String,
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationStatus {
    Processed,
    Confirmed,
    Finalized,
    Failed(String),
}

impl ConfirmationStatus {
    pub fn is_landed(&self) -> bool {
        matches!(self, ConfirmationStatus::Confirmed | ConfirmationStatus::Finalized)
    }
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn get_account_info(&self, pubkey: &str) -> Result<Option<AccountData>, ChainError>;

    /// Result order matches `pubkeys`
    async fn get_multiple_accounts(&self, pubkeys: &[String]) -> Result<Vec<Option<AccountData>>, ChainError>;

    /// JSON-encoded transaction, `None` if unknown
    async fn get_transaction(&self, signature: &str) -> Result<Option<serde_json::Value>, ChainError>;

    async fn get_signatures_for_address(&self, address: &str, limit: usize) -> Result<Vec<SignatureInfo>, ChainError>;

    async fn get_latest_blockhash(&self) -> Result<BlockhashInfo, ChainError>;

    async fn get_block_height(&self) -> Result<u64, ChainError>;

    /// Submit a serialized, signed transaction. Returns its signature.
    async fn send_transaction(&self, tx_bytes: &[u8]) -> Result<String, ChainError>;

    async fn get_signature_status(&self, signature: &str) -> Result<Option<ConfirmationStatus>, ChainError>;

    fn max_accounts_per_call(&self) -> usize {
        DEFAULT_MAX_ACCOUNTS_PER_CALL
    }
}

/// Bundle relay for MEV-protected submission of an already signed payload
#[async_trait]
pub trait BundleRelay: Send + Sync {
    /// `encoded` holds base64 transactions. Returns the bundle id.
    async fn send_bundle(&self, encoded: Vec<String>) -> Result<String, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ChainError::Timeout.is_retryable());
        assert!(ChainError::RateLimited.is_retryable());
        assert!(ChainError::Transport("reset".into()).is_retryable());
        assert!(ChainError::ServerError { status: 503, message: "busy".into() }.is_retryable());
        assert!(!ChainError::ServerError { status: 400, message: "bad".into() }.is_retryable());
        assert!(!ChainError::InvalidParams("bad pubkey".into()).is_retryable());
        assert!(!ChainError::BlockhashExpired.is_retryable());
    }

    #[test]
    fn test_landed_status() {
        assert!(ConfirmationStatus::Confirmed.is_landed());
        assert!(ConfirmationStatus::Finalized.is_landed());
        assert!(!ConfirmationStatus::Processed.is_landed());
        assert!(!ConfirmationStatus::Failed("x".into()).is_landed());
    }
}
