//! Protection Monitor
//!
//! Timer-driven side of the pipeline: samples market data into the
//! velocity tracker, keeps the exit cache warm, and reconciles exits whose
//! confirmation timed out. Velocity triggers are spawned so a pending exit
//! never stalls sampling.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::orchestrator::{
    drain_trigger_tasks, reap_trigger_tasks, OrchestratorError, ProtectionOrchestrator, TriggerReport,
};
use crate::domain::{VelocitySample, VelocitySnapshot, VelocityTracker};
use crate::ports::market::MarketDataSource;
use crate::ports::store::ProtectionStore;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub sample_interval: Duration,
    pub cache_refresh_interval: Duration,
    pub reconcile_interval: Duration,
    /// Concurrent market data requests per sampling round
    pub sample_concurrency: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(15),
            cache_refresh_interval: Duration::from_secs(20),
            reconcile_interval: Duration::from_secs(30),
            sample_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SampleSummary {
    pub tokens: usize,
    pub sampled: usize,
    pub failed: usize,
    pub alerts: usize,
    pub untracked: usize,
}

pub struct ProtectionMonitor {
    orchestrator: Arc<ProtectionOrchestrator>,
    tracker: Arc<VelocityTracker>,
    market: Arc<dyn MarketDataSource>,
    store: Arc<dyn ProtectionStore>,
    config: MonitorConfig,
    is_running: Arc<RwLock<bool>>,
    triggers: Mutex<JoinSet<()>>,
}

impl ProtectionMonitor {
    pub fn new(
        orchestrator: Arc<ProtectionOrchestrator>,
        tracker: Arc<VelocityTracker>,
        market: Arc<dyn MarketDataSource>,
        store: Arc<dyn ProtectionStore>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            orchestrator,
            tracker,
            market,
            store,
            config,
            is_running: Arc::new(RwLock::new(false)),
            triggers: Mutex::new(JoinSet::new()),
        }
    }

    fn triggers(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.triggers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Velocity triggers not yet collected
    pub fn in_flight_triggers(&self) -> usize {
        let mut triggers = self.triggers();
        reap_trigger_tasks(&mut triggers);
        triggers.len()
    }

    /// Wait up to `grace` for spawned velocity triggers
    pub async fn drain_triggers(&self, grace: Duration) {
        let mut triggers = std::mem::take(&mut *self.triggers());
        drain_trigger_tasks(&mut triggers, grace).await;
    }

    fn spawn_trigger(&self, snapshot: VelocitySnapshot) {
        let orchestrator = Arc::clone(&self.orchestrator);
        let slots = orchestrator.trigger_slots();
        let mut triggers = self.triggers();
        reap_trigger_tasks(&mut triggers);
        triggers.spawn(async move {
            let Ok(_permit) = slots.acquire_owned().await else {
                return;
            };
            let token = &snapshot.token_mint;
            match orchestrator.handle_velocity(&snapshot).await {
                Ok(TriggerReport::Processed(outcomes)) => {
                    tracing::info!("Velocity trigger on {} handled {} positions", token, outcomes.len())
                }
                Ok(other) => tracing::debug!("Velocity trigger on {}: {:?}", token, other),
                Err(e) => tracing::error!("Velocity trigger on {} failed: {}", token, e),
            }
        });
    }

    /// One sampling round over every protected token. Samples feed the
    /// tracker first; the store copy is audit only.
    pub async fn sample_once(&self) -> Result<SampleSummary, OrchestratorError> {
        let tokens: BTreeSet<String> = self
            .store
            .list_active_positions()
            .await?
            .into_iter()
            .filter(|p| p.is_monitored())
            .map(|p| p.token_mint)
            .collect();

        let mut summary = SampleSummary {
            tokens: tokens.len(),
            ..SampleSummary::default()
        };

        for stale in self.tracker.tracked_tokens() {
            if !tokens.contains(&stale) && self.tracker.untrack(&stale) {
                summary.untracked += 1;
            }
        }

        let market = &self.market;
        let samples: Vec<(String, Result<VelocitySample, _>)> = stream::iter(tokens)
            .map(|token| async move {
                let sample = market.sample(&token).await;
                (token, sample)
            })
            .buffer_unordered(self.config.sample_concurrency.max(1))
            .collect()
            .await;

        for (token, sample) in samples {
            let sample = match sample {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!("Market sample for {} failed: {}", token, e);
                    summary.failed += 1;
                    continue;
                }
            };
            let snapshot = match self.tracker.record(&token, sample) {
                Ok(s) => s,
                Err(e) => {
                    tracing::debug!("Sample for {} rejected: {}", token, e);
                    summary.failed += 1;
                    continue;
                }
            };
            summary.sampled += 1;
            if let Err(e) = self.store.append_velocity_sample(&token, &sample).await {
                tracing::warn!("Failed to persist velocity sample for {}: {}", token, e);
            }

            if snapshot.needs_immediate_check() {
                summary.alerts += 1;
                tracing::warn!(
                    token = %token,
                    liquidity_1m = snapshot.one_minute.liquidity_change_pct,
                    liquidity_5m = snapshot.five_minutes.liquidity_change_pct,
                    "Velocity alert: {}",
                    snapshot.alerts.flags().join(", ")
                );
                self.spawn_trigger(snapshot);
            }
        }

        Ok(summary)
    }

    pub async fn run(&self) -> Result<(), OrchestratorError> {
        *self.is_running.write().await = true;
        tracing::info!(
            "Starting protection monitor - sample every {:?}, cache refresh every {:?}, reconcile every {:?}",
            self.config.sample_interval,
            self.config.cache_refresh_interval,
            self.config.reconcile_interval
        );

        let mut sample_tick = tokio::time::interval(self.config.sample_interval);
        let mut refresh_tick = tokio::time::interval(self.config.cache_refresh_interval);
        let mut reconcile_tick = tokio::time::interval(self.config.reconcile_interval);
        for tick in [&mut sample_tick, &mut refresh_tick, &mut reconcile_tick] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        let mut stop_check = tokio::time::interval(Duration::from_millis(250));

        while *self.is_running.read().await {
            tokio::select! {
                _ = sample_tick.tick() => {
                    if let Err(e) = self.sample_once().await {
                        tracing::error!("Velocity sampling failed: {}", e);
                    }
                }
                _ = refresh_tick.tick() => {
                    match self.orchestrator.refresh_all_caches().await {
                        Ok(summary) if summary.failed > 0 => tracing::warn!(
                            "Cache refresh: {} refreshed, {} empty, {} failed",
                            summary.refreshed, summary.empty, summary.failed
                        ),
                        Ok(summary) => tracing::debug!("Cache refresh: {} refreshed", summary.refreshed),
                        Err(e) => tracing::error!("Cache refresh failed: {}", e),
                    }
                }
                _ = reconcile_tick.tick() => {
                    match self.orchestrator.reconcile_pending().await {
                        Ok(summary) if summary.checked > 0 => tracing::info!(
                            "Reconciled {} pending exits: {} landed, {} failed, {} still pending",
                            summary.checked, summary.executed, summary.failed, summary.pending
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::error!("Reconciliation failed: {}", e),
                    }
                }
                _ = stop_check.tick() => {}
            }
        }

        tracing::info!("Protection monitor stopped");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.is_running.write().await = false;
        tracing::info!("Protection monitor stop requested");
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::alerts::AlertDispatcher;
    use crate::application::exit_cache::{ExitCacheConfig, ExitTransactionCache};
    use crate::application::orchestrator::OrchestratorConfig;
    use crate::application::priority_sender::{PrioritySender, SenderConfig};
    use crate::domain::{MembershipFilter, PositionStatus, ProtectionLevel, VelocityThresholds};
    use crate::gateway::{BatchConfig, BatchRpcProcessor, GuardConfig, RpcGateway};
    use crate::ports::alerts::AlertKind;
    use crate::ports::mocks::{
        InMemoryCustody, InMemoryStore, MockChain, MockTradeBuilder, RecordingAlertSink, StaticMarketData,
    };
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::{Keypair, Signer};

    struct Fixture {
        chain: Arc<MockChain>,
        custody: Arc<InMemoryCustody>,
        monitor: Arc<ProtectionMonitor>,
        orchestrator: Arc<ProtectionOrchestrator>,
        tracker: Arc<VelocityTracker>,
        market: Arc<StaticMarketData>,
        store: Arc<InMemoryStore>,
        sink: Arc<RecordingAlertSink>,
    }

    fn fixture(config: MonitorConfig) -> Fixture {
        let chain = Arc::new(MockChain::new());
        let gateway = Arc::new(RpcGateway::new(chain.clone(), GuardConfig::default()));
        let batch = Arc::new(BatchRpcProcessor::spawn(gateway.clone(), BatchConfig::default()));
        let custody = Arc::new(InMemoryCustody::new());
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(ExitTransactionCache::new(
            batch,
            Arc::new(MockTradeBuilder::default()),
            custody.clone(),
            ExitCacheConfig::default(),
        ));
        let sender = Arc::new(PrioritySender::new(gateway.clone(), None, SenderConfig::default()));
        let sink = Arc::new(RecordingAlertSink::new());
        let orchestrator = Arc::new(ProtectionOrchestrator::new(
            store.clone(),
            custody.clone(),
            cache,
            sender,
            gateway,
            Arc::new(AlertDispatcher::new(vec![sink.clone()])),
            MembershipFilter::default(),
            OrchestratorConfig::default(),
        ));
        let tracker = Arc::new(VelocityTracker::new(VelocityThresholds::default()));
        let market = Arc::new(StaticMarketData::new());
        let monitor = Arc::new(ProtectionMonitor::new(
            orchestrator.clone(),
            tracker.clone(),
            market.clone(),
            store.clone(),
            config,
        ));
        Fixture {
            chain,
            custody,
            monitor,
            orchestrator,
            tracker,
            market,
            store,
            sink,
        }
    }

    #[tokio::test]
    async fn test_flash_rug_sample_notifies_manual_holder() {
        let f = fixture(MonitorConfig::default());
        let mint = Pubkey::new_unique().to_string();
        let wallet = Pubkey::new_unique().to_string();
        f.orchestrator
            .enable_protection(&mint, &wallet, ProtectionLevel::Manual, false)
            .await
            .unwrap();

        f.market.push(&mint, VelocitySample::at(1_000, 1.0, 100_000.0, 10.0));
        let first = f.monitor.sample_once().await.unwrap();
        assert_eq!(first.sampled, 1);
        assert_eq!(first.alerts, 0);

        // Liquidity gone a minute later
        f.market.push(&mint, VelocitySample::at(61_000, 0.4, 20_000.0, 10.0));
        let second = f.monitor.sample_once().await.unwrap();
        assert_eq!(second.alerts, 1);

        f.monitor.drain_triggers(Duration::from_secs(2)).await;
        f.orchestrator.alerts().drain().await;
        assert_eq!(f.sink.count(AlertKind::ManualActionRequired), 1);
        assert_eq!(f.store.samples(&mint).len(), 2);
        assert_eq!(f.store.position(&mint, &wallet).unwrap().status, PositionStatus::Active);
    }

    #[tokio::test]
    async fn test_pending_exit_does_not_stall_sampling() {
        let f = fixture(MonitorConfig::default());
        // Exits never confirm; each one waits out the 30s confirmation window
        f.chain.set_auto_confirm(false);
        let mut mints = Vec::new();
        for _ in 0..2 {
            let owner = Keypair::new();
            let mint = Pubkey::new_unique();
            f.chain.set_token_balance(&owner.pubkey(), &mint, 1_000_000);
            f.custody.insert(&owner);
            f.orchestrator
                .enable_protection(
                    &mint.to_string(),
                    &owner.pubkey().to_string(),
                    ProtectionLevel::Automatic,
                    false,
                )
                .await
                .unwrap();
            mints.push(mint.to_string());
        }
        let (a, b) = (&mints[0], &mints[1]);

        for (t, liq_a, liq_b) in [(1_000, 100_000.0, 100_000.0), (61_000, 20_000.0, 100_000.0)] {
            f.market.push(a, VelocitySample::at(t, 1.0, liq_a, 10.0));
            f.market.push(b, VelocitySample::at(t, 1.0, liq_b, 10.0));
            let summary = tokio::time::timeout(Duration::from_secs(2), f.monitor.sample_once())
                .await
                .expect("sampling stalled")
                .unwrap();
            assert_eq!(summary.sampled, 2);
        }
        assert_eq!(f.monitor.in_flight_triggers(), 1);

        // The next round still runs while the first exit awaits confirmation
        f.market.push(b, VelocitySample::at(121_000, 0.4, 20_000.0, 10.0));
        let third = tokio::time::timeout(Duration::from_secs(2), f.monitor.sample_once())
            .await
            .expect("sampling stalled behind a pending exit")
            .unwrap();
        assert!(third.alerts >= 1);

        let mut sent = 0;
        for _ in 0..100 {
            sent = f.chain.sent_transactions().len();
            if sent == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sent, 2);
        f.monitor.drain_triggers(Duration::from_millis(50)).await;
        assert_eq!(f.monitor.in_flight_triggers(), 0);
    }

    #[tokio::test]
    async fn test_market_failure_is_counted() {
        let f = fixture(MonitorConfig::default());
        let mint = Pubkey::new_unique().to_string();
        f.orchestrator
            .enable_protection(&mint, &Pubkey::new_unique().to_string(), ProtectionLevel::Manual, false)
            .await
            .unwrap();

        let summary = f.monitor.sample_once().await.unwrap();
        assert_eq!(summary.tokens, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.sampled, 0);
    }

    #[tokio::test]
    async fn test_unprotected_tokens_untracked() {
        let f = fixture(MonitorConfig::default());
        let mint = Pubkey::new_unique().to_string();
        let wallet = Pubkey::new_unique().to_string();
        f.orchestrator
            .enable_protection(&mint, &wallet, ProtectionLevel::Manual, false)
            .await
            .unwrap();
        f.market.push(&mint, VelocitySample::at(1_000, 1.0, 1_000.0, 1.0));
        f.monitor.sample_once().await.unwrap();
        assert_eq!(f.tracker.tracked_tokens(), vec![mint.clone()]);

        f.orchestrator.disable_protection(&mint, &wallet).await.unwrap();
        let summary = f.monitor.sample_once().await.unwrap();
        assert_eq!(summary.untracked, 1);
        assert!(f.tracker.tracked_tokens().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops() {
        let f = fixture(MonitorConfig {
            sample_interval: Duration::from_millis(20),
            cache_refresh_interval: Duration::from_millis(20),
            reconcile_interval: Duration::from_millis(20),
            sample_concurrency: 2,
        });
        let monitor = f.monitor.clone();
        let handle = tokio::spawn(async move { monitor.run().await });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(f.monitor.is_running().await);
        f.monitor.stop().await;
        let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert!(!f.monitor.is_running().await);
    }
}
