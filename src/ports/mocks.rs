//! In-memory port implementations for tests and demo runs.
//!
//! Each mock records its calls and exposes builder-style knobs for the
//! failure modes the pipeline has to survive.

use async_trait::async_trait;
use solana_sdk::{
    hash::Hash,
    message::{Message, VersionedMessage},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_instruction,
    transaction::VersionedTransaction,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::adapters::solana::token_account::{associated_token_address, encode_token_account, TOKEN_PROGRAM_ID};
use crate::domain::{PositionKey, ProtectedPosition, VelocitySample};
use crate::ports::alerts::{Alert, AlertError, AlertKind, AlertSink};
use crate::ports::chain::{
    AccountData, BlockhashInfo, BundleRelay, ChainError, ChainRpc, ConfirmationStatus, SignatureInfo,
};
use crate::ports::custody::{CustodyError, KeyCustody};
use crate::ports::market::{MarketDataError, MarketDataSource};
use crate::ports::store::{AuditEvent, AuditKind, ProtectionStore, StoreError};
use crate::ports::stream::{EventStream, StreamError};
use crate::ports::trade::{ExitQuote, PriorityFee, TradeBuilder, TradeError, UnsignedExit};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ChainState {
    accounts: HashMap<String, AccountData>,
    transactions: HashMap<String, serde_json::Value>,
    signatures: HashMap<String, Vec<SignatureInfo>>,
    statuses: HashMap<String, ConfirmationStatus>,
    sent: Vec<Vec<u8>>,
    expired_blockhashes: HashSet<String>,
    fail_next: u32,
    failure: ChainError,
    always_fail: Option<ChainError>,
    method_calls: HashMap<&'static str, u64>,
    block_height: u64,
    blockhash: Hash,
}

/// Programmable chain. Sends verify signatures and, with auto-confirm on,
/// land immediately.
#[derive(Debug)]
pub struct MockChain {
    state: Mutex<ChainState>,
    calls: AtomicU64,
    auto_confirm: AtomicBool,
    max_accounts: usize,
    latency: Option<Duration>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                accounts: HashMap::new(),
                transactions: HashMap::new(),
                signatures: HashMap::new(),
                statuses: HashMap::new(),
                sent: Vec::new(),
                expired_blockhashes: HashSet::new(),
                fail_next: 0,
                failure: ChainError::Timeout,
                always_fail: None,
                method_calls: HashMap::new(),
                block_height: 1_000,
                blockhash: Hash::new_unique(),
            }),
            calls: AtomicU64::new(0),
            auto_confirm: AtomicBool::new(true),
            max_accounts: crate::ports::chain::DEFAULT_MAX_ACCOUNTS_PER_CALL,
            latency: None,
        }
    }

    /// Cap accounts per `getMultipleAccounts` call
    pub fn with_max_accounts(mut self, max: usize) -> Self {
        self.max_accounts = max.max(1);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Fail the next `n` calls with `error`
    pub fn fail_next(&self, n: u32, error: ChainError) {
        let mut state = lock(&self.state);
        state.fail_next = n;
        state.failure = error;
    }

    pub fn fail_always(&self, error: ChainError) {
        lock(&self.state).always_fail = Some(error);
    }

    pub fn heal(&self) {
        let mut state = lock(&self.state);
        state.always_fail = None;
        state.fail_next = 0;
    }

    pub fn set_auto_confirm(&self, enabled: bool) {
        self.auto_confirm.store(enabled, Ordering::SeqCst);
    }

    pub fn set_account(&self, account: AccountData) {
        lock(&self.state).accounts.insert(account.pubkey.clone(), account);
    }

    /// Create the wallet's SPL associated token account holding `amount`
    pub fn set_token_balance(&self, wallet: &Pubkey, mint: &Pubkey, amount: u64) {
        let ata = associated_token_address(wallet, mint, &TOKEN_PROGRAM_ID);
        self.set_account(AccountData {
            pubkey: ata.to_string(),
            lamports: 2_039_280,
            owner: TOKEN_PROGRAM_ID.to_string(),
            data: encode_token_account(mint, wallet, amount),
        });
    }

    pub fn set_transaction(&self, signature: &str, tx: serde_json::Value) {
        lock(&self.state).transactions.insert(signature.to_string(), tx);
    }

    pub fn set_signatures(&self, address: &str, infos: Vec<SignatureInfo>) {
        lock(&self.state).signatures.insert(address.to_string(), infos);
    }

    pub fn set_status(&self, signature: &str, status: ConfirmationStatus) {
        lock(&self.state).statuses.insert(signature.to_string(), status);
    }

    /// Sends referencing `blockhash` are rejected as expired
    pub fn expire_blockhash(&self, blockhash: &Hash) {
        lock(&self.state).expired_blockhashes.insert(blockhash.to_string());
    }

    /// Total provider calls attempted
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, method: &str) -> u64 {
        lock(&self.state).method_calls.get(method).copied().unwrap_or(0)
    }

    pub fn sent_transactions(&self) -> Vec<VersionedTransaction> {
        lock(&self.state)
            .sent
            .iter()
            .filter_map(|bytes| bincode::deserialize(bytes).ok())
            .collect()
    }

    async fn enter(&self, method: &'static str) -> Result<(), ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = lock(&self.state);
        *state.method_calls.entry(method).or_insert(0) += 1;
        if let Some(err) = &state.always_fail {
            return Err(err.clone());
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(state.failure.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl ChainRpc for MockChain {
    async fn get_account_info(&self, pubkey: &str) -> Result<Option<AccountData>, ChainError> {
        self.enter("getAccountInfo").await?;
        Pubkey::from_str(pubkey).map_err(|_| ChainError::InvalidParams(format!("invalid pubkey {}", pubkey)))?;
        Ok(lock(&self.state).accounts.get(pubkey).cloned())
    }

    async fn get_multiple_accounts(&self, pubkeys: &[String]) -> Result<Vec<Option<AccountData>>, ChainError> {
        self.enter("getMultipleAccounts").await?;
        if pubkeys.len() > self.max_accounts {
            return Err(ChainError::InvalidParams(format!(
                "too many accounts: {} > {}",
                pubkeys.len(),
                self.max_accounts
            )));
        }
        let state = lock(&self.state);
        Ok(pubkeys.iter().map(|k| state.accounts.get(k).cloned()).collect())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<serde_json::Value>, ChainError> {
        self.enter("getTransaction").await?;
        Ok(lock(&self.state).transactions.get(signature).cloned())
    }

    async fn get_signatures_for_address(&self, address: &str, limit: usize) -> Result<Vec<SignatureInfo>, ChainError> {
        self.enter("getSignaturesForAddress").await?;
        Ok(lock(&self.state)
            .signatures
            .get(address)
            .map(|v| v.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_latest_blockhash(&self) -> Result<BlockhashInfo, ChainError> {
        self.enter("getLatestBlockhash").await?;
        let state = lock(&self.state);
        Ok(BlockhashInfo {
            blockhash: state.blockhash.to_string(),
            last_valid_block_height: state.block_height + 150,
        })
    }

    async fn get_block_height(&self) -> Result<u64, ChainError> {
        self.enter("getBlockHeight").await?;
        Ok(lock(&self.state).block_height)
    }

    async fn send_transaction(&self, tx_bytes: &[u8]) -> Result<String, ChainError> {
        self.enter("sendTransaction").await?;
        let tx: VersionedTransaction =
            bincode::deserialize(tx_bytes).map_err(|e| ChainError::InvalidParams(e.to_string()))?;

        let mut state = lock(&self.state);
        if state
            .expired_blockhashes
            .contains(&tx.message.recent_blockhash().to_string())
        {
            return Err(ChainError::BlockhashExpired);
        }
        let signature = tx
            .signatures
            .first()
            .copied()
            .ok_or_else(|| ChainError::Rejected("missing signature".to_string()))?;
        if signature == Signature::default() || tx.verify_with_results().iter().any(|ok| !ok) {
            return Err(ChainError::Rejected("signature verification failed".to_string()));
        }

        state.sent.push(tx_bytes.to_vec());
        if self.auto_confirm.load(Ordering::SeqCst) {
            state
                .statuses
                .insert(signature.to_string(), ConfirmationStatus::Confirmed);
        }
        Ok(signature.to_string())
    }

    async fn get_signature_status(&self, signature: &str) -> Result<Option<ConfirmationStatus>, ChainError> {
        self.enter("getSignatureStatuses").await?;
        Ok(lock(&self.state).statuses.get(signature).cloned())
    }

    fn max_accounts_per_call(&self) -> usize {
        self.max_accounts
    }
}

/// Records bundles, always accepts
#[derive(Debug, Default)]
pub struct MockBundleRelay {
    bundles: Mutex<Vec<Vec<String>>>,
}

impl MockBundleRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bundles(&self) -> Vec<Vec<String>> {
        lock(&self.bundles).clone()
    }
}

#[async_trait]
impl BundleRelay for MockBundleRelay {
    async fn send_bundle(&self, encoded: Vec<String>) -> Result<String, ChainError> {
        let mut bundles = lock(&self.bundles);
        bundles.push(encoded);
        Ok(format!("bundle-{}", bundles.len()))
    }
}

// ---------------------------------------------------------------------------
// Trade builder
// ---------------------------------------------------------------------------

/// Quotes at a fixed price and builds a self-transfer per request, so
/// each variant is a distinct, signable transaction.
#[derive(Debug)]
pub struct MockTradeBuilder {
    price: f64,
    blockhash: Mutex<Hash>,
    quotes: AtomicU64,
    builds: AtomicU64,
    fail_quotes: AtomicBool,
}

impl Default for MockTradeBuilder {
    fn default() -> Self {
        Self::new(0.000_001)
    }
}

impl MockTradeBuilder {
    /// `price` is output units per input unit
    pub fn new(price: f64) -> Self {
        Self {
            price,
            blockhash: Mutex::new(Hash::new_unique()),
            quotes: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            fail_quotes: AtomicBool::new(false),
        }
    }

    pub fn set_fail_quotes(&self, fail: bool) {
        self.fail_quotes.store(fail, Ordering::SeqCst);
    }

    pub fn blockhash(&self) -> Hash {
        *lock(&self.blockhash)
    }

    /// Subsequent builds reference a new blockhash. Returns the old one.
    pub fn rotate_blockhash(&self) -> Hash {
        let mut current = lock(&self.blockhash);
        let old = *current;
        *current = Hash::new_unique();
        old
    }

    pub fn quote_count(&self) -> u64 {
        self.quotes.load(Ordering::SeqCst)
    }

    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TradeBuilder for MockTradeBuilder {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u16,
    ) -> Result<ExitQuote, TradeError> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(TradeError::ApiError("mock quote failure".to_string()));
        }
        if amount == 0 {
            return Err(TradeError::InvalidParameters("amount must be positive".to_string()));
        }
        Ok(ExitQuote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            in_amount: amount,
            out_amount: (amount as f64 * self.price) as u64,
            price_impact_pct: 0.5,
            slippage_bps: max_slippage_bps,
            route: "MockDEX".to_string(),
            raw: serde_json::Value::Null,
        })
    }

    async fn build_transaction(
        &self,
        quote: &ExitQuote,
        wallet: &str,
        priority_fee: PriorityFee,
    ) -> Result<UnsignedExit, TradeError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let payer = Pubkey::from_str(wallet)
            .map_err(|_| TradeError::InvalidParameters(format!("invalid wallet {}", wallet)))?;

        // Amount encodes tier and fee so variants differ
        let marker = quote.slippage_bps as u64 * 1_000_000_000 + priority_fee.lamports + 1;
        let ix = system_instruction::transfer(&payer, &payer, marker);
        let message = Message::new_with_blockhash(&[ix], Some(&payer), &self.blockhash());
        let signatures = vec![Signature::default(); message.header.num_required_signatures as usize];

        Ok(UnsignedExit {
            transaction: VersionedTransaction {
                signatures,
                message: VersionedMessage::Legacy(message),
            },
            last_valid_block_height: 1_150,
            priority_fee,
        })
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryStore {
    positions: Mutex<BTreeMap<PositionKey, ProtectedPosition>>,
    audit: Mutex<Vec<AuditEvent>>,
    samples: Mutex<HashMap<String, Vec<VelocitySample>>>,
    unavailable: AtomicBool,
    reads: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        lock(&self.audit).clone()
    }

    pub fn audit_count(&self, kind: AuditKind) -> usize {
        lock(&self.audit).iter().filter(|e| e.kind == kind).count()
    }

    pub fn position(&self, token_mint: &str, wallet: &str) -> Option<ProtectedPosition> {
        lock(&self.positions)
            .get(&PositionKey::new(token_mint, wallet))
            .cloned()
    }

    pub fn samples(&self, token_mint: &str) -> Vec<VelocitySample> {
        lock(&self.samples).get(token_mint).cloned().unwrap_or_default()
    }

    /// Position reads served
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("mock store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProtectionStore for InMemoryStore {
    async fn upsert_position(&self, position: &ProtectedPosition) -> Result<(), StoreError> {
        self.check()?;
        lock(&self.positions).insert(position.key(), position.clone());
        Ok(())
    }

    async fn get_position(&self, token_mint: &str, wallet: &str) -> Result<Option<ProtectedPosition>, StoreError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.position(token_mint, wallet))
    }

    async fn get_active_positions_for_token(&self, token_mint: &str) -> Result<Vec<ProtectedPosition>, StoreError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.positions)
            .values()
            .filter(|p| p.token_mint == token_mint && p.is_active)
            .cloned()
            .collect())
    }

    async fn list_active_positions(&self) -> Result<Vec<ProtectedPosition>, StoreError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.positions).values().filter(|p| p.is_active).cloned().collect())
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        self.check()?;
        lock(&self.audit).push(event.clone());
        Ok(())
    }

    async fn append_velocity_sample(&self, token_mint: &str, sample: &VelocitySample) -> Result<(), StoreError> {
        self.check()?;
        lock(&self.samples)
            .entry(token_mint.to_string())
            .or_default()
            .push(*sample);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Custody
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryCustody {
    keys: Mutex<HashMap<String, Vec<u8>>>,
    requests: AtomicU64,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keypair(self, keypair: &Keypair) -> Self {
        self.insert(keypair);
        self
    }

    pub fn insert(&self, keypair: &Keypair) {
        lock(&self.keys).insert(keypair.pubkey().to_string(), keypair.to_bytes().to_vec());
    }

    pub fn remove(&self, wallet: &str) {
        lock(&self.keys).remove(wallet);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyCustody for InMemoryCustody {
    async fn signing_key(&self, wallet: &str) -> Result<Keypair, CustodyError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let bytes = lock(&self.keys)
            .get(wallet)
            .cloned()
            .ok_or_else(|| CustodyError::Unavailable(wallet.to_string()))?;
        Keypair::try_from(bytes.as_slice()).map_err(|e| CustodyError::Corrupted {
            wallet: wallet.to_string(),
            reason: e.to_string(),
        })
    }

    async fn has_key(&self, wallet: &str) -> bool {
        lock(&self.keys).contains_key(wallet)
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
    fail: AtomicBool,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries fail but are still recorded
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.alerts).clone()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        lock(&self.alerts).iter().filter(|a| a.kind == kind).count()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn send_alert(&self, alert: Alert) -> Result<(), AlertError> {
        lock(&self.alerts).push(alert);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AlertError::DeliveryFailed("mock sink failure".to_string()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Replays scripted samples per token; the last sample repeats
#[derive(Debug, Default)]
pub struct StaticMarketData {
    scripts: Mutex<HashMap<String, VecDeque<VelocitySample>>>,
    last: Mutex<HashMap<String, VelocitySample>>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, token_mint: &str, sample: VelocitySample) {
        lock(&self.scripts)
            .entry(token_mint.to_string())
            .or_default()
            .push_back(sample);
    }
}

#[async_trait]
impl MarketDataSource for StaticMarketData {
    async fn sample(&self, token_mint: &str) -> Result<VelocitySample, MarketDataError> {
        let next = lock(&self.scripts)
            .get_mut(token_mint)
            .and_then(|q| q.pop_front());
        let mut last = lock(&self.last);
        match next {
            Some(sample) => {
                last.insert(token_mint.to_string(), sample);
                Ok(sample)
            }
            None => last
                .get(token_mint)
                .copied()
                .ok_or_else(|| MarketDataError::NoData(token_mint.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MockEventStream {
    sinks: Mutex<HashMap<String, mpsc::Sender<serde_json::Value>>>,
}

impl MockEventStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `payload` to the subscriber of `token_mint`. Returns false
    /// when nobody is subscribed.
    pub async fn emit(&self, token_mint: &str, payload: serde_json::Value) -> bool {
        let sink = lock(&self.sinks).get(token_mint).cloned();
        match sink {
            Some(tx) => tx.send(payload).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl EventStream for MockEventStream {
    async fn subscribe(&self, token_mint: &str, sink: mpsc::Sender<serde_json::Value>) -> Result<(), StreamError> {
        lock(&self.sinks).entry(token_mint.to_string()).or_insert(sink);
        Ok(())
    }

    async fn unsubscribe(&self, token_mint: &str) {
        lock(&self.sinks).remove(token_mint);
    }

    fn subscribed(&self) -> Vec<String> {
        let mut tokens: Vec<String> = lock(&self.sinks).keys().cloned().collect();
        tokens.sort();
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_chain_failure_injection() {
        let chain = MockChain::new();
        chain.fail_next(2, ChainError::RateLimited);
        assert_eq!(chain.get_block_height().await, Err(ChainError::RateLimited));
        assert_eq!(chain.get_block_height().await, Err(ChainError::RateLimited));
        assert_eq!(chain.get_block_height().await, Ok(1_000));
        assert_eq!(chain.calls(), 3);
        assert_eq!(chain.calls_for("getBlockHeight"), 3);
    }

    #[tokio::test]
    async fn test_mock_chain_rejects_unsigned() {
        let chain = MockChain::new();
        let builder = MockTradeBuilder::default();
        let wallet = Keypair::new();
        let quote = builder
            .quote("MintA", "So11111111111111111111111111111111111111112", 1000, 500)
            .await
            .unwrap();
        let unsigned = builder
            .build_transaction(&quote, &wallet.pubkey().to_string(), PriorityFee::compute_unit(10))
            .await
            .unwrap();
        let bytes = bincode::serialize(&unsigned.transaction).unwrap();
        assert!(matches!(chain.send_transaction(&bytes).await, Err(ChainError::Rejected(_))));

        let signed = VersionedTransaction::try_new(unsigned.transaction.message.clone(), &[&wallet]).unwrap();
        let bytes = bincode::serialize(&signed).unwrap();
        let sig = chain.send_transaction(&bytes).await.unwrap();
        assert_eq!(
            chain.get_signature_status(&sig).await.unwrap(),
            Some(ConfirmationStatus::Confirmed)
        );
        assert_eq!(chain.sent_transactions().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_chain_expired_blockhash() {
        let chain = MockChain::new();
        let builder = MockTradeBuilder::default();
        let wallet = Keypair::new();
        let quote = builder.quote("MintA", "MintB", 1000, 500).await.unwrap();
        let unsigned = builder
            .build_transaction(&quote, &wallet.pubkey().to_string(), PriorityFee::compute_unit(10))
            .await
            .unwrap();
        let signed = VersionedTransaction::try_new(unsigned.transaction.message, &[&wallet]).unwrap();
        chain.expire_blockhash(&builder.blockhash());
        let bytes = bincode::serialize(&signed).unwrap();
        assert_eq!(chain.send_transaction(&bytes).await, Err(ChainError::BlockhashExpired));
    }

    #[tokio::test]
    async fn test_in_memory_custody() {
        let kp = Keypair::new();
        let custody = InMemoryCustody::new().with_keypair(&kp);
        let wallet = kp.pubkey().to_string();
        assert_eq!(custody.signing_key(&wallet).await.unwrap().pubkey(), kp.pubkey());
        assert!(custody.has_key(&wallet).await);
        custody.remove(&wallet);
        assert!(matches!(
            custody.signing_key(&wallet).await,
            Err(CustodyError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_static_market_data_repeats_last() {
        let market = StaticMarketData::new();
        market.push("MintA", VelocitySample::at(1, 1.0, 2.0, 3.0));
        assert_eq!(market.sample("MintA").await.unwrap().liquidity, 2.0);
        assert_eq!(market.sample("MintA").await.unwrap().liquidity, 2.0);
        assert!(market.sample("MintB").await.is_err());
    }
}
