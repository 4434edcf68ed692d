//! Trade builder behind its own call guard
//!
//! The aggregator gets the same quota, breaker and retry discipline as the
//! RPC provider, with a separate budget so quote bursts during a rug never
//! starve chain reads.

use async_trait::async_trait;
use std::sync::Arc;

use super::guard::{CallGuard, GuardConfig, GuardError, GuardHealth};
use crate::ports::trade::{ExitQuote, PriorityFee, TradeBuilder, TradeError, UnsignedExit};

pub struct GuardedTradeBuilder {
    inner: Arc<dyn TradeBuilder>,
    guard: CallGuard,
}

impl GuardedTradeBuilder {
    pub fn new(inner: Arc<dyn TradeBuilder>, config: GuardConfig) -> Self {
        Self {
            inner,
            guard: CallGuard::new("aggregator", config),
        }
    }

    pub fn health(&self) -> GuardHealth {
        self.guard.health()
    }
}

fn into_trade_error(e: GuardError<TradeError>) -> TradeError {
    match e {
        GuardError::Rejected(inner) => inner,
        GuardError::CircuitOpen { retry_in_ms } => {
            TradeError::ApiError(format!("aggregator circuit open, retry in {}ms", retry_in_ms))
        }
        GuardError::Unavailable { operation, attempts, reason } => {
            TradeError::ApiError(format!("{} failed after {} attempts: {}", operation, attempts, reason))
        }
    }
}

#[async_trait]
impl TradeBuilder for GuardedTradeBuilder {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u16,
    ) -> Result<ExitQuote, TradeError> {
        let inner = &self.inner;
        self.guard
            .run("quote", || async move {
                inner.quote(input_mint, output_mint, amount, max_slippage_bps).await
            })
            .await
            .map_err(into_trade_error)
    }

    async fn build_transaction(
        &self,
        quote: &ExitQuote,
        wallet: &str,
        priority_fee: PriorityFee,
    ) -> Result<UnsignedExit, TradeError> {
        let inner = &self.inner;
        self.guard
            .run("swap", || async move { inner.build_transaction(quote, wallet, priority_fee).await })
            .await
            .map_err(into_trade_error)
    }
}
