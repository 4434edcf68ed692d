//! Market data port feeding the velocity tracker

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::VelocitySample;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("HTTP error: {0}")]
    HttpError(String),
    #[error("No market data for mint: {0}")]
    NoData(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Current price, liquidity and volume for `token_mint`
    async fn sample(&self, token_mint: &str) -> Result<VelocitySample, MarketDataError>;
}
