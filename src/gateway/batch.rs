//! Batch RPC Processor
//!
//! Coalesces individual reads into fewer provider calls. Account reads are
//! queued for a short flush interval (or until the batch fills), then
//! deduplicated and sent as `getMultipleAccounts`. Transaction lookups have
//! no batch form and fan out with bounded concurrency instead.

use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

use super::rpc_gateway::{GatewayError, RpcGateway};
use crate::ports::chain::AccountData;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub flush_interval: Duration,
    pub max_batch_size: usize,
    /// Hard cap on how long a request waits before its batch is flushed
    pub max_wait: Duration,
    pub fanout_concurrency: usize,
    pub queue_capacity: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_millis(20),
            max_batch_size: 100,
            max_wait: Duration::from_millis(50),
            fanout_concurrency: 8,
            queue_capacity: 4_096,
        }
    }
}

/// Savings accounting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Individual read operations requested
    pub operations: u64,
    /// Provider calls actually issued
    pub provider_calls: u64,
    pub batches: u64,
    /// Requests answered by a duplicate in the same batch
    pub deduplicated: u64,
}

impl BatchStats {
    /// Fraction of calls saved, 0.0 when nothing ran
    pub fn savings_ratio(&self) -> f64 {
        if self.operations == 0 {
            return 0.0;
        }
        1.0 - (self.provider_calls as f64 / self.operations as f64)
    }
}

#[derive(Debug, Default)]
struct Counters {
    operations: AtomicU64,
    provider_calls: AtomicU64,
    batches: AtomicU64,
    deduplicated: AtomicU64,
}

type Reply<T> = oneshot::Sender<Result<T, GatewayError>>;

struct AccountRequest {
    pubkey: String,
    reply: Reply<Option<AccountData>>,
}

struct TransactionRequest {
    signature: String,
    reply: Reply<Option<serde_json::Value>>,
}

pub struct BatchRpcProcessor {
    accounts: mpsc::Sender<AccountRequest>,
    transactions: mpsc::Sender<TransactionRequest>,
    counters: Arc<Counters>,
}

impl BatchRpcProcessor {
    /// Start the collector tasks. They stop when the processor is dropped.
    pub fn spawn(gateway: Arc<RpcGateway>, config: BatchConfig) -> Self {
        let (accounts_tx, accounts_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (tx_tx, tx_rx) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(Counters::default());

        tokio::spawn(run_account_collector(
            gateway.clone(),
            accounts_rx,
            config.clone(),
            counters.clone(),
        ));
        tokio::spawn(run_transaction_collector(gateway, tx_rx, config, counters.clone()));

        Self {
            accounts: accounts_tx,
            transactions: tx_tx,
            counters,
        }
    }

    pub async fn get_account(&self, pubkey: &str) -> Result<Option<AccountData>, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.accounts
            .send(AccountRequest {
                pubkey: pubkey.to_string(),
                reply,
            })
            .await
            .map_err(|_| GatewayError::Cancelled)?;
        rx.await.map_err(|_| GatewayError::Cancelled)?
    }

    /// Concurrent reads that share batches; results in input order
    pub async fn get_accounts(&self, pubkeys: &[String]) -> Vec<Result<Option<AccountData>, GatewayError>> {
        futures_util::future::join_all(pubkeys.iter().map(|k| self.get_account(k))).await
    }

    pub async fn get_transaction(&self, signature: &str) -> Result<Option<serde_json::Value>, GatewayError> {
        let (reply, rx) = oneshot::channel();
        self.transactions
            .send(TransactionRequest {
                signature: signature.to_string(),
                reply,
            })
            .await
            .map_err(|_| GatewayError::Cancelled)?;
        rx.await.map_err(|_| GatewayError::Cancelled)?
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            operations: self.counters.operations.load(Ordering::Relaxed),
            provider_calls: self.counters.provider_calls.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            deduplicated: self.counters.deduplicated.load(Ordering::Relaxed),
        }
    }
}

/// Gather requests after `first` until the batch fills or the flush
/// deadline passes. Returns whether the channel is still open.
async fn collect<R>(rx: &mut mpsc::Receiver<R>, first: R, config: &BatchConfig) -> (Vec<R>, bool) {
    let deadline = Instant::now() + config.flush_interval.min(config.max_wait);
    let max = config.max_batch_size.max(1);
    let mut batch = vec![first];

    while batch.len() < max {
        tokio::select! {
            biased;
            item = rx.recv() => match item {
                Some(req) => batch.push(req),
                None => return (batch, false),
            },
            _ = sleep_until(deadline) => break,
        }
    }
    (batch, true)
}

async fn run_account_collector(
    gateway: Arc<RpcGateway>,
    mut rx: mpsc::Receiver<AccountRequest>,
    config: BatchConfig,
    counters: Arc<Counters>,
) {
    while let Some(first) = rx.recv().await {
        let (batch, open) = collect(&mut rx, first, &config).await;
        tokio::spawn(dispatch_accounts(gateway.clone(), batch, counters.clone()));
        if !open {
            break;
        }
    }
    tracing::debug!("Account batch collector stopped");
}

async fn dispatch_accounts(gateway: Arc<RpcGateway>, batch: Vec<AccountRequest>, counters: Arc<Counters>) {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<String> = Vec::new();
    for req in &batch {
        if !index.contains_key(&req.pubkey) {
            index.insert(req.pubkey.clone(), unique.len());
            unique.push(req.pubkey.clone());
        }
    }

    let per_call = gateway.max_accounts_per_call();
    let calls = unique.len().div_ceil(per_call) as u64;
    counters.operations.fetch_add(batch.len() as u64, Ordering::Relaxed);
    counters.deduplicated.fetch_add((batch.len() - unique.len()) as u64, Ordering::Relaxed);
    counters.provider_calls.fetch_add(calls, Ordering::Relaxed);
    counters.batches.fetch_add(1, Ordering::Relaxed);

    tracing::trace!("Flushing {} account reads as {} call(s)", batch.len(), calls);

    match gateway.get_multiple_accounts(&unique).await {
        Ok(accounts) => {
            for req in batch {
                let account = index
                    .get(&req.pubkey)
                    .and_then(|&i| accounts.get(i).cloned())
                    .flatten();
                let _ = req.reply.send(Ok(account));
            }
        }
        Err(e) => {
            tracing::warn!("Batched account read failed for {} keys: {}", unique.len(), e);
            for req in batch {
                let _ = req.reply.send(Err(e.clone()));
            }
        }
    }
}

async fn run_transaction_collector(
    gateway: Arc<RpcGateway>,
    mut rx: mpsc::Receiver<TransactionRequest>,
    config: BatchConfig,
    counters: Arc<Counters>,
) {
    while let Some(first) = rx.recv().await {
        let (batch, open) = collect(&mut rx, first, &config).await;
        let gateway = gateway.clone();
        let counters = counters.clone();
        let concurrency = config.fanout_concurrency.max(1);
        tokio::spawn(async move {
            counters.operations.fetch_add(batch.len() as u64, Ordering::Relaxed);
            counters.provider_calls.fetch_add(batch.len() as u64, Ordering::Relaxed);
            counters.batches.fetch_add(1, Ordering::Relaxed);

            stream::iter(batch)
                .map(|req| {
                    let gateway = gateway.clone();
                    async move {
                        let result = gateway.get_transaction(&req.signature).await;
                        let _ = req.reply.send(result);
                    }
                })
                .buffer_unordered(concurrency)
                .collect::<Vec<()>>()
                .await;
        });
        if !open {
            break;
        }
    }
    tracing::debug!("Transaction batch collector stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::backoff::BackoffPolicy;
    use crate::gateway::guard::GuardConfig;
    use crate::ports::chain::ChainError;
    use crate::ports::mocks::MockChain;
    use solana_sdk::pubkey::Pubkey;

    fn gateway(chain: Arc<MockChain>) -> Arc<RpcGateway> {
        Arc::new(RpcGateway::new(
            chain,
            GuardConfig {
                requests_per_minute: 60_000,
                burst: 1_000,
                backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(2), 1),
                ..GuardConfig::default()
            },
        ))
    }

    fn account(pubkey: &str) -> AccountData {
        AccountData {
            pubkey: pubkey.to_string(),
            lamports: 42,
            owner: Pubkey::default().to_string(),
            data: vec![1, 2, 3],
        }
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_call() {
        let chain = Arc::new(MockChain::new());
        let keys: Vec<String> = (0..50).map(|_| Pubkey::new_unique().to_string()).collect();
        for k in &keys[..10] {
            chain.set_account(account(k));
        }
        let batcher = BatchRpcProcessor::spawn(gateway(chain.clone()), BatchConfig::default());

        let results = batcher.get_accounts(&keys).await;
        assert_eq!(results.len(), 50);
        assert_eq!(results.iter().filter(|r| matches!(r, Ok(Some(_)))).count(), 10);
        assert_eq!(chain.calls_for("getMultipleAccounts"), 1);

        let stats = batcher.stats();
        assert_eq!(stats.operations, 50);
        assert_eq!(stats.provider_calls, 1);
        assert!(stats.savings_ratio() > 0.95);
    }

    #[tokio::test]
    async fn test_duplicate_keys_deduplicated() {
        let chain = Arc::new(MockChain::new());
        let key = Pubkey::new_unique().to_string();
        chain.set_account(account(&key));
        let batcher = BatchRpcProcessor::spawn(gateway(chain.clone()), BatchConfig::default());

        let keys = vec![key.clone(), key.clone(), key];
        let results = batcher.get_accounts(&keys).await;
        assert!(results.iter().all(|r| matches!(r, Ok(Some(a)) if a.lamports == 42)));
        assert_eq!(batcher.stats().deduplicated, 2);
    }

    #[tokio::test]
    async fn test_full_batch_flushes_early() {
        let chain = Arc::new(MockChain::new());
        let config = BatchConfig {
            max_batch_size: 10,
            flush_interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(5),
            ..BatchConfig::default()
        };
        let batcher = BatchRpcProcessor::spawn(gateway(chain.clone()), config);
        let keys: Vec<String> = (0..20).map(|_| Pubkey::new_unique().to_string()).collect();

        let started = std::time::Instant::now();
        let results = batcher.get_accounts(&keys).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(batcher.stats().batches, 2);
    }

    #[tokio::test]
    async fn test_max_wait_bounds_latency() {
        let chain = Arc::new(MockChain::new());
        let config = BatchConfig {
            flush_interval: Duration::from_secs(10),
            max_wait: Duration::from_millis(30),
            ..BatchConfig::default()
        };
        let batcher = BatchRpcProcessor::spawn(gateway(chain), config);

        let started = std::time::Instant::now();
        let result = batcher.get_account(&Pubkey::new_unique().to_string()).await;
        assert_eq!(result, Ok(None));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_failure_reaches_every_waiter() {
        let chain = Arc::new(MockChain::new());
        chain.fail_always(ChainError::Timeout);
        let batcher = BatchRpcProcessor::spawn(gateway(chain), BatchConfig::default());
        let keys: Vec<String> = (0..3).map(|_| Pubkey::new_unique().to_string()).collect();
        let results = batcher.get_accounts(&keys).await;
        assert!(results
            .iter()
            .all(|r| matches!(r, Err(GatewayError::Unavailable { .. }))));
    }

    #[tokio::test]
    async fn test_transactions_fan_out() {
        let chain = Arc::new(MockChain::new());
        chain.set_transaction("sigA", serde_json::json!({"slot": 1}));
        let batcher = BatchRpcProcessor::spawn(gateway(chain.clone()), BatchConfig::default());

        let (a, b) = tokio::join!(batcher.get_transaction("sigA"), batcher.get_transaction("sigB"));
        assert_eq!(a.unwrap(), Some(serde_json::json!({"slot": 1})));
        assert_eq!(b.unwrap(), None);
        assert_eq!(chain.calls_for("getTransaction"), 2);
        assert_eq!(batcher.stats().savings_ratio(), 0.0);
    }
}
