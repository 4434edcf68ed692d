//! End-to-end protection scenarios against the in-memory ports

use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rugguard::application::orchestrator::OutcomeKind;
use rugguard::application::{AppContext, Ports, TriggerReport};
use rugguard::config::Config;
use rugguard::domain::{
    CircuitState, PositionStatus, ProtectionLevel, ThreatCategory, ThreatEvent, VelocitySample,
};
use rugguard::gateway::{BackoffPolicy, GuardConfig, RpcGateway};
use rugguard::ports::mocks::{
    InMemoryCustody, InMemoryStore, MockChain, MockEventStream, MockTradeBuilder, RecordingAlertSink,
    StaticMarketData,
};
use rugguard::ports::{AlertKind, AuditKind, ChainError};

const T0: u64 = 1_700_000_000_000;
const BALANCE: u64 = 5_000_000_000;

struct Pipeline {
    ctx: AppContext,
    chain: Arc<MockChain>,
    trade: Arc<MockTradeBuilder>,
    store: Arc<InMemoryStore>,
    custody: Arc<InMemoryCustody>,
    sink: Arc<RecordingAlertSink>,
    mint: Pubkey,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.gateway.requests_per_minute = 60_000;
    config.gateway.burst = 1_000;
    config.gateway.trade_requests_per_minute = 60_000;
    config.sender.confirmation_timeout_secs = 1;
    config.sender.poll_interval_ms = 10;
    config.batch.flush_interval_ms = 5;
    config
}

fn pipeline_with(chain: MockChain) -> Pipeline {
    pipeline_with_config(chain, test_config())
}

fn pipeline_with_config(chain: MockChain, config: Config) -> Pipeline {
    let chain = Arc::new(chain);
    let trade = Arc::new(MockTradeBuilder::default());
    let store = Arc::new(InMemoryStore::new());
    let custody = Arc::new(InMemoryCustody::new());
    let sink = Arc::new(RecordingAlertSink::new());

    let ctx = AppContext::from_ports(
        config,
        Ports {
            chain: chain.clone(),
            relay: None,
            trade: trade.clone(),
            store: store.clone(),
            custody: custody.clone(),
            market: Arc::new(StaticMarketData::new()),
            sinks: vec![sink.clone()],
        },
    );
    Pipeline {
        ctx,
        chain,
        trade,
        store,
        custody,
        sink,
        mint: Pubkey::new_unique(),
    }
}

fn pipeline() -> Pipeline {
    pipeline_with(MockChain::new())
}

impl Pipeline {
    /// Fund a wallet, optionally hand its key to custody, and enable protection
    async fn protect(&self, level: ProtectionLevel, with_key: bool) -> Keypair {
        self.protect_mint(&self.mint, level, with_key).await
    }

    async fn protect_mint(&self, mint: &Pubkey, level: ProtectionLevel, with_key: bool) -> Keypair {
        let owner = Keypair::new();
        self.chain.set_token_balance(&owner.pubkey(), mint, BALANCE);
        if with_key {
            self.custody.insert(&owner);
        }
        self.ctx
            .orchestrator
            .enable_protection(&mint.to_string(), &owner.pubkey().to_string(), level, false)
            .await
            .unwrap();
        owner
    }

    fn status(&self, owner: &Keypair) -> PositionStatus {
        self.store
            .position(&self.mint.to_string(), &owner.pubkey().to_string())
            .unwrap()
            .status
    }
}

/// Deliver a payload once the stream has subscribed to `mint`
async fn emit_when_subscribed(stream: &MockEventStream, mint: &str, payload: serde_json::Value) {
    for _ in 0..50 {
        if stream.emit(mint, payload.clone()).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("stream never subscribed to {}", mint);
}

fn removal_log(mint: &str, slot: u64) -> serde_json::Value {
    json!({
        "signature": format!("logsig{}", slot),
        "slot": slot,
        "token_mint": mint,
        "logs": ["Program log: Instruction: RemoveLiquidity"]
    })
}

fn liquidity_removal(mint: &Pubkey, slot: u64) -> ThreatEvent {
    ThreatEvent {
        category: ThreatCategory::LiquidityRemoval,
        risk_score: 95,
        confidence: 0.95,
        signature: format!("rugsig{}", slot),
        token_mint: Some(mint.to_string()),
        slot,
        matched_rule: "remove_liquidity_ix".to_string(),
    }
}

#[tokio::test]
async fn flash_rug_exits_with_presigned_transaction() {
    let p = pipeline();
    let owner = p.protect(ProtectionLevel::Automatic, true).await;
    let mint = p.mint.to_string();

    p.ctx.tracker.record(&mint, VelocitySample::at(T0, 0.01, 100_000.0, 5_000.0)).unwrap();
    let snapshot = p
        .ctx
        .tracker
        .record(&mint, VelocitySample::at(T0 + 60_000, 0.004, 30_000.0, 5_000.0))
        .unwrap();
    assert!(snapshot.alerts.flash_rug);

    let report = p.ctx.orchestrator.handle_velocity(&snapshot).await.unwrap();
    let outcomes = report.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].kind, OutcomeKind::Executed);
    let result = outcomes[0].result.as_ref().unwrap();
    assert!(result.success);
    assert!(result.presigned_used);

    assert_eq!(p.status(&owner), PositionStatus::Executed);
    assert!(!p.ctx.orchestrator.is_protected(&mint));
    assert_eq!(p.chain.sent_transactions().len(), 1);
    assert_eq!(p.store.audit_count(AuditKind::ExecutionSucceeded), 1);

    p.ctx.alerts.drain().await;
    assert_eq!(p.sink.count(AlertKind::ExitExecuted), 1);
}

#[tokio::test]
async fn missing_key_alerts_and_keeps_position_active() {
    let p = pipeline();
    let owner = p.protect(ProtectionLevel::Automatic, false).await;

    let report = p
        .ctx
        .orchestrator
        .handle_threat(&liquidity_removal(&p.mint, 500))
        .await
        .unwrap();
    assert_eq!(report.outcomes()[0].kind, OutcomeKind::MissingKey);

    assert_eq!(p.status(&owner), PositionStatus::Active);
    assert!(p.ctx.orchestrator.is_protected(&p.mint.to_string()));
    assert!(p.chain.sent_transactions().is_empty());
    assert_eq!(p.store.audit_count(AuditKind::MissingKey), 1);

    p.ctx.alerts.drain().await;
    assert_eq!(p.sink.count(AlertKind::MissingKey), 1);
}

#[tokio::test]
async fn duplicate_trigger_is_attempted_once() {
    let p = pipeline();
    p.protect(ProtectionLevel::Automatic, true).await;

    let first = p
        .ctx
        .orchestrator
        .handle_threat(&liquidity_removal(&p.mint, 700))
        .await
        .unwrap();
    assert_eq!(first.outcomes().len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let second = p
        .ctx
        .orchestrator
        .handle_threat(&liquidity_removal(&p.mint, 700))
        .await
        .unwrap();
    assert_eq!(second, TriggerReport::Duplicate);

    assert_eq!(p.store.audit_count(AuditKind::ExecutionAttempt), 1);
    assert_eq!(p.ctx.orchestrator.counters().duplicates, 1);
}

#[tokio::test]
async fn one_wallet_failure_does_not_block_another() {
    let p = pipeline();
    let keyed = p.protect(ProtectionLevel::Automatic, true).await;
    let keyless = p.protect(ProtectionLevel::Automatic, false).await;

    let report = p
        .ctx
        .orchestrator
        .handle_threat(&liquidity_removal(&p.mint, 900))
        .await
        .unwrap();
    let outcomes = report.outcomes();
    assert_eq!(outcomes.len(), 2);
    let kind_for = |owner: &Keypair| {
        outcomes
            .iter()
            .find(|o| o.key.wallet == owner.pubkey().to_string())
            .map(|o| o.kind)
            .unwrap()
    };
    assert_eq!(kind_for(&keyed), OutcomeKind::Executed);
    assert_eq!(kind_for(&keyless), OutcomeKind::MissingKey);

    assert_eq!(p.status(&keyed), PositionStatus::Executed);
    assert_eq!(p.status(&keyless), PositionStatus::Active);
    // The keyless position still holds a filter count
    assert!(p.ctx.orchestrator.is_protected(&p.mint.to_string()));
}

#[tokio::test]
async fn manual_level_notifies_without_sending() {
    let p = pipeline();
    let owner = p.protect(ProtectionLevel::Manual, true).await;

    let report = p
        .ctx
        .orchestrator
        .handle_threat(&liquidity_removal(&p.mint, 1_100))
        .await
        .unwrap();
    assert_eq!(report.outcomes()[0].kind, OutcomeKind::ManualNotified);
    assert!(p.chain.sent_transactions().is_empty());
    assert_eq!(p.status(&owner), PositionStatus::Active);
    assert_eq!(p.store.audit_count(AuditKind::ManualNotification), 1);

    p.ctx.alerts.drain().await;
    assert_eq!(p.sink.count(AlertKind::ManualActionRequired), 1);
}

#[tokio::test]
async fn expired_presigned_exit_is_rebuilt() {
    let p = pipeline();
    let owner = p.protect(ProtectionLevel::Automatic, true).await;

    // Cached variants reference the old blockhash, which the chain now rejects
    let old = p.trade.rotate_blockhash();
    p.chain.expire_blockhash(&old);

    let report = p
        .ctx
        .orchestrator
        .handle_threat(&liquidity_removal(&p.mint, 1_300))
        .await
        .unwrap();
    let outcome = &report.outcomes()[0];
    assert_eq!(outcome.kind, OutcomeKind::Executed);
    assert!(!outcome.result.as_ref().unwrap().presigned_used);

    let sent = p.chain.sent_transactions();
    assert_eq!(sent.len(), 1);
    assert_eq!(*sent[0].message.recent_blockhash(), p.trade.blockhash());
    assert_eq!(p.status(&owner), PositionStatus::Executed);
}

#[tokio::test]
async fn disable_during_exit_leaves_position_inactive() {
    let p = pipeline_with(MockChain::new().with_latency(Duration::from_millis(100)));
    let owner = p.protect(ProtectionLevel::Automatic, true).await;
    let mint = p.mint.to_string();
    let wallet = owner.pubkey().to_string();

    let orchestrator = p.ctx.orchestrator.clone();
    let event = liquidity_removal(&p.mint, 1_500);
    let exit = tokio::spawn(async move { orchestrator.handle_threat(&event).await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    p.ctx.orchestrator.disable_protection(&mint, &wallet).await.unwrap();

    let report = exit.await.unwrap().unwrap();
    assert_eq!(report.outcomes()[0].kind, OutcomeKind::Executed);

    let position = p.store.position(&mint, &wallet).unwrap();
    assert!(!position.is_active);
    assert_eq!(position.status, PositionStatus::Executed);
    assert!(!p.ctx.orchestrator.is_protected(&mint));
}

#[tokio::test]
async fn streamed_log_triggers_exit() {
    let p = pipeline();
    let owner = p.protect(ProtectionLevel::Automatic, true).await;
    let mint = p.mint.to_string();

    let stream = Arc::new(MockEventStream::new());
    let services = p.ctx.start(stream.clone()).await.unwrap();

    let mut subscribed = false;
    for _ in 0..50 {
        if stream.emit(&mint, json!({"token_mint": mint.clone(), "context": {"slot": 4242}, "value": {
            "signature": "streamsig",
            "logs": ["Program log: Instruction: RemoveLiquidity"],
        }})).await {
            subscribed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(subscribed, "stream never subscribed to {}", mint);

    let mut executed = false;
    for _ in 0..100 {
        if p.status(&owner) == PositionStatus::Executed {
            executed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(executed);

    services.shutdown(Duration::from_secs(2)).await;
    p.ctx.alerts.drain().await;
    assert_eq!(p.sink.count(AlertKind::ExitExecuted), 1);
}

#[tokio::test]
async fn pending_exit_does_not_delay_another_token() {
    let mut config = test_config();
    config.sender.confirmation_timeout_secs = 10;
    let p = pipeline_with_config(MockChain::new(), config);
    let other_mint = Pubkey::new_unique();
    p.protect(ProtectionLevel::Automatic, true).await;
    p.protect_mint(&other_mint, ProtectionLevel::Automatic, true).await;
    // Neither exit confirms, so the first one sits in its confirmation wait
    p.chain.set_auto_confirm(false);

    let stream = Arc::new(MockEventStream::new());
    let services = p.ctx.start(stream.clone()).await.unwrap();
    let (first, second) = (p.mint.to_string(), other_mint.to_string());

    emit_when_subscribed(&stream, &first, removal_log(&first, 10)).await;
    for _ in 0..50 {
        if p.chain.sent_transactions().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(p.chain.sent_transactions().len(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    let detected = Instant::now();
    emit_when_subscribed(&stream, &second, removal_log(&second, 11)).await;
    let mut sent = 1;
    while detected.elapsed() < Duration::from_secs(2) {
        sent = p.chain.sent_transactions().len();
        if sent == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(sent, 2, "second token's exit waited behind the first");
    assert!(detected.elapsed() < Duration::from_secs(1), "took {:?}", detected.elapsed());

    services.shutdown(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn redelivered_event_after_store_outage_is_handled() {
    let p = pipeline();
    let owner = p.protect(ProtectionLevel::Automatic, true).await;
    let event = liquidity_removal(&p.mint, 1_700);

    p.store.set_unavailable(true);
    assert!(p.ctx.orchestrator.handle_threat(&event).await.is_err());
    p.store.set_unavailable(false);

    let report = p.ctx.orchestrator.handle_threat(&event).await.unwrap();
    assert_ne!(report, TriggerReport::Duplicate);
    assert_eq!(report.outcomes()[0].kind, OutcomeKind::Executed);
    assert_eq!(p.status(&owner), PositionStatus::Executed);

    p.ctx.alerts.drain().await;
    assert_eq!(p.sink.count(AlertKind::InfrastructureDegraded), 1);
}

#[tokio::test]
async fn gateway_recovers_after_cancelled_half_open_call() {
    let chain = Arc::new(MockChain::new().with_latency(Duration::from_millis(50)));
    let gateway = RpcGateway::new(
        chain.clone(),
        GuardConfig {
            failure_threshold: 2,
            cooldown: Duration::from_millis(100),
            call_timeout: Duration::from_secs(1),
            backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(5), 2),
            ..GuardConfig::default()
        },
    );

    chain.fail_always(ChainError::Timeout);
    assert!(gateway.get_block_height().await.is_err());
    assert_eq!(gateway.health().breaker.state, CircuitState::Open);
    chain.heal();
    tokio::time::sleep(Duration::from_millis(150)).await;

    // The caller gives up on the half-open call before the provider answers
    let abandoned = tokio::time::timeout(Duration::from_millis(10), gateway.get_block_height()).await;
    assert!(abandoned.is_err());

    assert_eq!(gateway.get_block_height().await, Ok(1_000));
    assert_eq!(gateway.health().breaker.state, CircuitState::Closed);
}

#[tokio::test]
async fn unpersisted_outcome_is_flagged_in_alerts() {
    let p = pipeline_with(MockChain::new().with_latency(Duration::from_millis(100)));
    p.protect(ProtectionLevel::Automatic, true).await;

    let orchestrator = p.ctx.orchestrator.clone();
    let event = liquidity_removal(&p.mint, 1_900);
    let exit = tokio::spawn(async move { orchestrator.handle_threat(&event).await });

    // Store drops out while the exit is on the wire
    tokio::time::sleep(Duration::from_millis(30)).await;
    p.store.set_unavailable(true);
    let report = exit.await.unwrap().unwrap();
    assert_eq!(report.outcomes()[0].kind, OutcomeKind::Executed);

    p.ctx.alerts.drain().await;
    let alerts = p.sink.alerts();
    let executed = alerts
        .iter()
        .find(|a| a.kind == AlertKind::ExitExecuted)
        .unwrap();
    assert_eq!(executed.metadata["persisted"], json!(false));
    assert_eq!(p.sink.count(AlertKind::InfrastructureDegraded), 1);
}
