//! Exit-Transaction Cache
//!
//! Keeps a ranked set of ready-to-send exit transactions per protected
//! position so the trigger path never waits on a quote. Variants span the
//! slippage tiers and priority tiers; when custody yields a key they are
//! signed up front.
//!
//! Refreshes are serialized per position and run concurrently across
//! positions.

use dashmap::DashMap;
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::adapters::solana::token_account::{candidate_token_accounts, decode_token_amount, WSOL_MINT};
use crate::domain::{PositionKey, PriorityTier, ProtectedPosition, Severity};
use crate::gateway::{BatchRpcProcessor, GatewayError};
use crate::ports::custody::KeyCustody;
use crate::ports::trade::{ExitQuote, PriorityFee, TradeBuilder};

/// Default slippage tiers (bps)
pub const DEFAULT_SLIPPAGE_TIERS_BPS: [u16; 3] = [1_000, 2_000, 5_000];

/// Default time-to-live of a cached entry
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CacheError {
    #[error("Balance read failed: {0}")]
    Balance(#[from] GatewayError),

    #[error("Nothing to sell for {0}")]
    NothingToSell(PositionKey),

    #[error("No exit variant could be built for {key}: {reason}")]
    NoVariants { key: PositionKey, reason: String },

    #[error("Invalid position: {0}")]
    InvalidPosition(String),
}

/// Fee in lamports per priority tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierFees {
    pub standard_lamports: u64,
    pub elevated_lamports: u64,
    pub urgent_lamports: u64,
}

impl Default for TierFees {
    fn default() -> Self {
        Self {
            standard_lamports: 10_000,
            elevated_lamports: 100_000,
            urgent_lamports: 1_000_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExitCacheConfig {
    pub slippage_tiers_bps: Vec<u16>,
    pub ttl: Duration,
    pub fees: TierFees,
    /// Pay the urgent tier as a Jito tip
    pub jito_tip_enabled: bool,
    pub refresh_concurrency: usize,
    /// What exits are sold into
    pub output_mint: String,
}

impl Default for ExitCacheConfig {
    fn default() -> Self {
        Self {
            slippage_tiers_bps: DEFAULT_SLIPPAGE_TIERS_BPS.to_vec(),
            ttl: DEFAULT_CACHE_TTL,
            fees: TierFees::default(),
            jito_tip_enabled: false,
            refresh_concurrency: 8,
            output_mint: WSOL_MINT.to_string(),
        }
    }
}

impl ExitCacheConfig {
    pub fn fee_for(&self, tier: PriorityTier) -> PriorityFee {
        match tier {
            PriorityTier::Standard => PriorityFee::compute_unit(self.fees.standard_lamports),
            PriorityTier::Elevated => PriorityFee::compute_unit(self.fees.elevated_lamports),
            PriorityTier::Urgent if self.jito_tip_enabled => PriorityFee::jito_tip(self.fees.urgent_lamports),
            PriorityTier::Urgent => PriorityFee::compute_unit(self.fees.urgent_lamports),
        }
    }
}

/// One ready exit
#[derive(Debug, Clone)]
pub struct CachedExitTransaction {
    pub key: PositionKey,
    pub slippage_bps: u16,
    pub priority: PriorityTier,
    pub transaction: VersionedTransaction,
    /// bincode wire bytes of `transaction`
    pub bytes: Vec<u8>,
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub route: String,
    pub presigned: bool,
    pub last_valid_block_height: u64,
    pub built_at: Instant,
}

impl CachedExitTransaction {
    /// First signature, only meaningful when presigned
    pub fn signature(&self) -> Option<String> {
        if !self.presigned {
            return None;
        }
        self.transaction.signatures.first().map(|s| s.to_string())
    }

    pub fn age(&self) -> Duration {
        self.built_at.elapsed()
    }
}

#[derive(Debug, Clone)]
pub enum CacheLookup {
    Fresh(Arc<CachedExitTransaction>),
    Stale(Arc<CachedExitTransaction>),
    Missing,
}

impl CacheLookup {
    pub fn is_fresh(&self) -> bool {
        matches!(self, CacheLookup::Fresh(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
    pub refreshes: u64,
    pub refresh_failures: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub empty: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct CacheEntry {
    /// Ranked, index 0 is the emergency transaction
    variants: Vec<Arc<CachedExitTransaction>>,
    built_at: Instant,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    stale: AtomicU64,
    refreshes: AtomicU64,
    refresh_failures: AtomicU64,
}

pub struct ExitTransactionCache {
    entries: DashMap<PositionKey, CacheEntry>,
    locks: DashMap<PositionKey, Arc<Mutex<()>>>,
    /// Highest block height seen on chain; 0 until the first observation
    block_height: AtomicU64,
    batch: Arc<BatchRpcProcessor>,
    trade: Arc<dyn TradeBuilder>,
    custody: Arc<dyn KeyCustody>,
    config: ExitCacheConfig,
    counters: Counters,
}

/// Presigned first, then higher priority tier, then lower slippage
fn rank(variants: &mut [CachedExitTransaction]) {
    variants.sort_by(|a, b| {
        b.presigned
            .cmp(&a.presigned)
            .then(b.priority.cmp(&a.priority))
            .then(a.slippage_bps.cmp(&b.slippage_bps))
    });
}

impl ExitTransactionCache {
    pub fn new(
        batch: Arc<BatchRpcProcessor>,
        trade: Arc<dyn TradeBuilder>,
        custody: Arc<dyn KeyCustody>,
        config: ExitCacheConfig,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            locks: DashMap::new(),
            block_height: AtomicU64::new(0),
            batch,
            trade,
            custody,
            config,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &ExitCacheConfig {
        &self.config
    }

    fn key_lock(&self, key: &PositionKey) -> Arc<Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }

    /// Raw token balance of the wallet, SPL Token account first, then Token-2022
    pub async fn token_balance(&self, wallet: &str, token_mint: &str) -> Result<u64, CacheError> {
        let candidates =
            candidate_token_accounts(wallet, token_mint).map_err(|e| CacheError::InvalidPosition(e.to_string()))?;
        let addresses: Vec<String> = candidates.iter().map(|p| p.to_string()).collect();

        for account in self.batch.get_accounts(&addresses).await {
            if let Some(account) = account? {
                match decode_token_amount(&account.data) {
                    Ok(amount) => return Ok(amount),
                    Err(e) => tracing::warn!("Undecodable token account {}: {}", account.pubkey, e),
                }
            }
        }
        Ok(0)
    }

    /// Quote every slippage tier concurrently, then build the requested
    /// priority tiers for each quote. Failed tiers are skipped.
    async fn build_variants(
        &self,
        position: &ProtectedPosition,
        amount: u64,
        keypair: Option<&Keypair>,
        tiers: &[PriorityTier],
    ) -> Result<Vec<CachedExitTransaction>, CacheError> {
        let key = position.key();
        let quotes = join_all(self.config.slippage_tiers_bps.iter().map(|&bps| {
            self.trade
                .quote(&position.token_mint, &self.config.output_mint, amount, bps)
        }))
        .await;

        let mut variants = Vec::new();
        let mut last_error = String::from("no slippage tiers configured");
        for (quote, bps) in quotes.into_iter().zip(self.config.slippage_tiers_bps.iter()) {
            let quote: ExitQuote = match quote {
                Ok(q) => q,
                Err(e) => {
                    tracing::warn!("Quote failed for {} at {} bps: {}", key, bps, e);
                    last_error = e.to_string();
                    continue;
                }
            };

            for &tier in tiers {
                let unsigned = match self
                    .trade
                    .build_transaction(&quote, &position.wallet, self.config.fee_for(tier))
                    .await
                {
                    Ok(u) => u,
                    Err(e) => {
                        tracing::warn!("Build failed for {} ({} bps, {}): {}", key, bps, tier, e);
                        last_error = e.to_string();
                        continue;
                    }
                };

                let (transaction, presigned) = match keypair {
                    Some(kp) => match VersionedTransaction::try_new(unsigned.transaction.message.clone(), &[kp]) {
                        Ok(signed) => (signed, true),
                        Err(e) => {
                            tracing::warn!("Signing failed for {}: {}", key, e);
                            (unsigned.transaction, false)
                        }
                    },
                    None => (unsigned.transaction, false),
                };

                let bytes = match bincode::serialize(&transaction) {
                    Ok(b) => b,
                    Err(e) => {
                        last_error = e.to_string();
                        continue;
                    }
                };

                variants.push(CachedExitTransaction {
                    key: key.clone(),
                    slippage_bps: quote.slippage_bps,
                    priority: tier,
                    transaction,
                    bytes,
                    in_amount: quote.in_amount,
                    out_amount: quote.out_amount,
                    price_impact_pct: quote.price_impact_pct,
                    route: quote.route.clone(),
                    presigned,
                    last_valid_block_height: unsigned.last_valid_block_height,
                    built_at: Instant::now(),
                });
            }
        }

        if variants.is_empty() {
            return Err(CacheError::NoVariants { key, reason: last_error });
        }
        rank(&mut variants);
        Ok(variants)
    }

    fn store(&self, key: PositionKey, variants: Vec<CachedExitTransaction>) -> Arc<CachedExitTransaction> {
        let variants: Vec<Arc<CachedExitTransaction>> = variants.into_iter().map(Arc::new).collect();
        let best = variants[0].clone();
        self.entries.insert(
            key,
            CacheEntry {
                variants,
                built_at: Instant::now(),
            },
        );
        best
    }

    /// Rebuild every variant for a position. Returns the variant count.
    pub async fn refresh(&self, position: &ProtectedPosition) -> Result<usize, CacheError> {
        let key = position.key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let result = self.refresh_locked(position, &key).await;
        match &result {
            Ok(count) => {
                self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cached {} exit variants for {}", count, key);
            }
            Err(CacheError::NothingToSell(_)) => {}
            Err(e) => {
                self.counters.refresh_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Exit cache refresh failed for {}: {}", key, e);
            }
        }
        result
    }

    async fn refresh_locked(&self, position: &ProtectedPosition, key: &PositionKey) -> Result<usize, CacheError> {
        let balance = self.token_balance(&position.wallet, &position.token_mint).await?;
        if balance == 0 {
            self.entries.remove(key);
            return Err(CacheError::NothingToSell(key.clone()));
        }

        let keypair = match self.custody.signing_key(&position.wallet).await {
            Ok(kp) => Some(kp),
            Err(e) => {
                tracing::debug!("No signing key for {}, caching unsigned: {}", key, e);
                None
            }
        };
        let variants = self
            .build_variants(position, balance, keypair.as_ref(), &PriorityTier::ALL)
            .await;
        drop(keypair);

        let variants = variants?;
        let count = variants.len();
        self.store(key.clone(), variants);
        Ok(count)
    }

    /// Emergency path: build and sign at the severity's tier with the
    /// supplied key, replacing the cached entry
    pub async fn build_on_demand(
        &self,
        position: &ProtectedPosition,
        severity: Severity,
        keypair: &Keypair,
    ) -> Result<Arc<CachedExitTransaction>, CacheError> {
        let key = position.key();
        if keypair.pubkey().to_string() != position.wallet {
            return Err(CacheError::InvalidPosition(format!("key does not match wallet {}", position.wallet)));
        }
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let balance = self.token_balance(&position.wallet, &position.token_mint).await?;
        if balance == 0 {
            self.entries.remove(&key);
            return Err(CacheError::NothingToSell(key));
        }

        let tier = PriorityTier::for_severity(severity);
        let variants = self.build_variants(position, balance, Some(keypair), &[tier]).await?;
        tracing::info!("Built {} on-demand exit variants for {} at {} tier", variants.len(), key, tier);
        Ok(self.store(key, variants))
    }

    /// Record the current chain height. Variants whose blockhash window
    /// ends below it are reported stale.
    pub fn observe_block_height(&self, height: u64) {
        self.block_height.fetch_max(height, Ordering::Relaxed);
    }

    pub fn block_height(&self) -> u64 {
        self.block_height.load(Ordering::Relaxed)
    }

    /// Best variant for the severity's tier, falling back to the top-ranked one
    pub fn lookup(&self, key: &PositionKey, severity: Severity) -> CacheLookup {
        let Some(entry) = self.entries.get(key) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return CacheLookup::Missing;
        };
        let tier = PriorityTier::for_severity(severity);
        let chosen = entry
            .variants
            .iter()
            .find(|v| v.priority == tier)
            .or_else(|| entry.variants.first())
            .cloned();

        match chosen {
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Missing
            }
            Some(variant)
                if entry.built_at.elapsed() < self.config.ttl
                    && variant.last_valid_block_height >= self.block_height() =>
            {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Fresh(variant)
            }
            Some(variant) => {
                self.counters.stale.fetch_add(1, Ordering::Relaxed);
                CacheLookup::Stale(variant)
            }
        }
    }

    /// All variants for a position, ranked
    pub fn variants(&self, key: &PositionKey) -> Vec<Arc<CachedExitTransaction>> {
        self.entries
            .get(key)
            .map(|e| e.variants.clone())
            .unwrap_or_default()
    }

    pub fn invalidate(&self, key: &PositionKey) -> bool {
        // A lock still referenced elsewhere belongs to a running refresh
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        self.entries.remove(key).is_some()
    }

    pub fn invalidate_token(&self, token_mint: &str) -> usize {
        self.locks
            .retain(|k, lock| k.token_mint != token_mint || Arc::strong_count(lock) > 1);
        let before = self.entries.len();
        self.entries.retain(|k, _| k.token_mint != token_mint);
        before - self.entries.len()
    }

    /// Per-position refresh locks currently held in the map
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub async fn refresh_all(&self, positions: &[ProtectedPosition]) -> RefreshSummary {
        let results: Vec<Result<usize, CacheError>> = stream::iter(positions.iter().filter(|p| p.is_monitored()))
            .map(|p| self.refresh(p))
            .buffer_unordered(self.config.refresh_concurrency.max(1))
            .boxed()
            .collect()
            .await;

        let mut summary = RefreshSummary::default();
        for result in results {
            match result {
                Ok(_) => summary.refreshed += 1,
                Err(CacheError::NothingToSell(_)) => summary.empty += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            stale: self.counters.stale.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            refresh_failures: self.counters.refresh_failures.load(Ordering::Relaxed),
        }
    }
}
