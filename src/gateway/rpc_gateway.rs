//! Rate-Limited RPC Gateway
//!
//! The single choke point for blockchain reads. Wraps a `ChainRpc` in a
//! process-wide `CallGuard`: token-bucket quota, bounded concurrency,
//! circuit breaker and jittered retries.

use std::sync::Arc;
use thiserror::Error;

use super::guard::{CallGuard, GuardConfig, GuardError, GuardHealth};
use crate::ports::chain::{AccountData, BlockhashInfo, ChainError, ChainRpc, ConfirmationStatus, SignatureInfo};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("RPC unavailable ({operation}, {attempts} attempts): {reason}")]
    Unavailable {
        operation: String,
        attempts: u32,
        reason: String,
    },

    #[error("RPC circuit open - retry in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },

    #[error("RPC request rejected: {0}")]
    InvalidRequest(ChainError),

    #[error("Request cancelled: batch processor stopped")]
    Cancelled,
}

impl GatewayError {
    /// Shared-infrastructure failure, as opposed to a bad request
    pub fn is_infrastructure(&self) -> bool {
        !matches!(self, GatewayError::InvalidRequest(_))
    }
}

impl From<GuardError<ChainError>> for GatewayError {
    fn from(e: GuardError<ChainError>) -> Self {
        match e {
            GuardError::Rejected(inner) => GatewayError::InvalidRequest(inner),
            GuardError::CircuitOpen { retry_in_ms } => GatewayError::CircuitOpen { retry_in_ms },
            GuardError::Unavailable {
                operation,
                attempts,
                reason,
            } => GatewayError::Unavailable {
                operation,
                attempts,
                reason,
            },
        }
    }
}

pub struct RpcGateway {
    chain: Arc<dyn ChainRpc>,
    guard: CallGuard,
}

impl RpcGateway {
    pub fn new(chain: Arc<dyn ChainRpc>, config: GuardConfig) -> Self {
        Self {
            chain,
            guard: CallGuard::new("rpc", config),
        }
    }

    /// Raw provider handle, for submission only. Reads go through the
    /// gateway methods.
    pub fn chain(&self) -> Arc<dyn ChainRpc> {
        self.chain.clone()
    }

    pub fn max_accounts_per_call(&self) -> usize {
        self.chain.max_accounts_per_call().max(1)
    }

    pub async fn get_account_info(&self, pubkey: &str) -> Result<Option<AccountData>, GatewayError> {
        let chain = &self.chain;
        Ok(self
            .guard
            .run("getAccountInfo", || async move { chain.get_account_info(pubkey).await })
            .await?)
    }

    /// Chunked to the provider's per-call limit; one guarded call per chunk
    pub async fn get_multiple_accounts(&self, pubkeys: &[String]) -> Result<Vec<Option<AccountData>>, GatewayError> {
        let mut out = Vec::with_capacity(pubkeys.len());
        for chunk in pubkeys.chunks(self.max_accounts_per_call()) {
            let chain = &self.chain;
            let accounts = self
                .guard
                .run("getMultipleAccounts", || async move { chain.get_multiple_accounts(chunk).await })
                .await?;
            out.extend(accounts);
        }
        Ok(out)
    }

    pub async fn get_transaction(&self, signature: &str) -> Result<Option<serde_json::Value>, GatewayError> {
        let chain = &self.chain;
        Ok(self
            .guard
            .run("getTransaction", || async move { chain.get_transaction(signature).await })
            .await?)
    }

    pub async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, GatewayError> {
        let chain = &self.chain;
        Ok(self
            .guard
            .run("getSignaturesForAddress", || async move {
                chain.get_signatures_for_address(address, limit).await
            })
            .await?)
    }

    pub async fn get_latest_blockhash(&self) -> Result<BlockhashInfo, GatewayError> {
        let chain = &self.chain;
        Ok(self
            .guard
            .run("getLatestBlockhash", || async move { chain.get_latest_blockhash().await })
            .await?)
    }

    pub async fn get_block_height(&self) -> Result<u64, GatewayError> {
        let chain = &self.chain;
        Ok(self
            .guard
            .run("getBlockHeight", || async move { chain.get_block_height().await })
            .await?)
    }

    pub async fn get_signature_status(&self, signature: &str) -> Result<Option<ConfirmationStatus>, GatewayError> {
        let chain = &self.chain;
        Ok(self
            .guard
            .run("getSignatureStatuses", || async move { chain.get_signature_status(signature).await })
            .await?)
    }

    pub fn health(&self) -> GuardHealth {
        self.guard.health()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CircuitState;
    use crate::gateway::backoff::BackoffPolicy;
    use crate::ports::mocks::MockChain;
    use solana_sdk::pubkey::Pubkey;
    use std::time::Duration;

    fn config(threshold: u32) -> GuardConfig {
        GuardConfig {
            requests_per_minute: 60_000,
            burst: 1_000,
            max_concurrency: 8,
            failure_threshold: threshold,
            cooldown: Duration::from_millis(100),
            call_timeout: Duration::from_millis(200),
            max_queue_wait: Duration::from_millis(500),
            backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 1),
        }
    }

    #[tokio::test]
    async fn test_breaker_opens_after_n_failures_and_fails_fast() {
        let chain = Arc::new(MockChain::new());
        let gateway = RpcGateway::new(chain.clone(), config(3));
        chain.fail_always(ChainError::ServerError {
            status: 503,
            message: "overloaded".into(),
        });

        for _ in 0..3 {
            assert!(matches!(
                gateway.get_block_height().await,
                Err(GatewayError::Unavailable { .. })
            ));
        }
        assert_eq!(chain.calls(), 3);
        assert_eq!(gateway.health().breaker.state, CircuitState::Open);

        // No network attempt while open
        for _ in 0..5 {
            assert!(matches!(
                gateway.get_block_height().await,
                Err(GatewayError::CircuitOpen { .. })
            ));
        }
        assert_eq!(chain.calls(), 3);
        assert_eq!(gateway.health().rejected_fast, 5);

        // One successful half-open trial closes it
        chain.heal();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(gateway.get_block_height().await, Ok(1_000));
        assert_eq!(gateway.health().breaker.state, CircuitState::Closed);
        assert_eq!(chain.calls(), 4);
    }

    #[tokio::test]
    async fn test_failed_trial_reopens() {
        let chain = Arc::new(MockChain::new());
        let gateway = RpcGateway::new(chain.clone(), config(2));
        chain.fail_always(ChainError::Timeout);
        let _ = gateway.get_block_height().await;
        let _ = gateway.get_block_height().await;
        assert_eq!(gateway.health().breaker.state, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(gateway.get_block_height().await.is_err());
        assert_eq!(gateway.health().breaker.state, CircuitState::Open);
        assert_eq!(gateway.health().breaker.total_trips, 2);
    }

    #[tokio::test]
    async fn test_invalid_params_not_retried() {
        let chain = Arc::new(MockChain::new());
        let mut cfg = config(3);
        cfg.backoff = BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 4);
        let gateway = RpcGateway::new(chain.clone(), cfg);

        let result = gateway.get_account_info("definitely-not-base58!").await;
        assert!(matches!(result, Err(GatewayError::InvalidRequest(ChainError::InvalidParams(_)))));
        assert_eq!(chain.calls(), 1);
    }

    #[tokio::test]
    async fn test_multiple_accounts_chunked() {
        let chain = Arc::new(MockChain::new().with_max_accounts(2));
        let gateway = RpcGateway::new(chain.clone(), config(3));
        let keys: Vec<String> = (0..5).map(|_| Pubkey::new_unique().to_string()).collect();

        let accounts = gateway.get_multiple_accounts(&keys).await.unwrap();
        assert_eq!(accounts.len(), 5);
        assert_eq!(chain.calls_for("getMultipleAccounts"), 3);
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(GatewayError::CircuitOpen { retry_in_ms: 1 }.is_infrastructure());
        assert!(!GatewayError::InvalidRequest(ChainError::InvalidParams("x".into())).is_infrastructure());
    }
}
