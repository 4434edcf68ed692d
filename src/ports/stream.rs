//! Inbound event stream port
//!
//! Raw JSON payloads (log lines or instruction summaries, tagged with a
//! signature and slot) for the tokens currently subscribed. Parsing into
//! typed events happens at the matcher's ingestion boundary.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StreamError {
    #[error("Subscription failed: {0}")]
    SubscribeFailed(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

#[async_trait]
pub trait EventStream: Send + Sync {
    /// Start delivering payloads that mention `token_mint` into `sink`.
    /// Subscribing twice is a no-op.
    async fn subscribe(&self, token_mint: &str, sink: mpsc::Sender<serde_json::Value>) -> Result<(), StreamError>;

    async fn unsubscribe(&self, token_mint: &str);

    fn subscribed(&self) -> Vec<String>;
}
