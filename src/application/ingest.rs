//! Ingest Pipeline
//!
//! Reactive path: stream payloads are parsed into `InboundEvent`s, queued
//! on the matcher pool by priority, and matched threats are handed to the
//! orchestrator. Each threat runs in its own task under the orchestrator's
//! trigger slots, so an exit waiting on confirmation never holds up
//! another token.

use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::orchestrator::{
    drain_trigger_tasks, reap_trigger_tasks, OrchestratorError, ProtectionOrchestrator, TriggerReport,
};
use crate::domain::ThreatEvent;
use crate::matcher::{InboundEvent, MatcherStats, MessagePriority, ThreatMatcherPool};
use crate::ports::store::ProtectionStore;
use crate::ports::stream::EventStream;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub channel_capacity: usize,
    /// Payloads gathered into one enqueue
    pub max_batch: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 4096,
            max_batch: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionSync {
    pub subscribed: usize,
    pub unsubscribed: usize,
    pub failed: usize,
}

pub struct IngestPipeline {
    orchestrator: Arc<ProtectionOrchestrator>,
    pool: Arc<ThreatMatcherPool>,
    stream: Arc<dyn EventStream>,
    store: Arc<dyn ProtectionStore>,
    payload_tx: mpsc::Sender<Value>,
    payload_rx: Mutex<Option<mpsc::Receiver<Value>>>,
    results_rx: Mutex<Option<mpsc::Receiver<ThreatEvent>>>,
    /// Threats being handled
    triggers: Mutex<JoinSet<()>>,
    config: IngestConfig,
    shutdown: watch::Sender<bool>,
}

impl IngestPipeline {
    pub fn new(
        orchestrator: Arc<ProtectionOrchestrator>,
        pool: Arc<ThreatMatcherPool>,
        results_rx: mpsc::Receiver<ThreatEvent>,
        stream: Arc<dyn EventStream>,
        store: Arc<dyn ProtectionStore>,
        config: IngestConfig,
    ) -> Self {
        let (payload_tx, payload_rx) = mpsc::channel(config.channel_capacity.max(1));
        let (shutdown, _) = watch::channel(false);
        Self {
            orchestrator,
            pool,
            stream,
            store,
            payload_tx,
            payload_rx: Mutex::new(Some(payload_rx)),
            results_rx: Mutex::new(Some(results_rx)),
            triggers: Mutex::new(JoinSet::new()),
            config,
            shutdown,
        }
    }

    /// Sender stream adapters deliver into
    pub fn payload_sender(&self) -> mpsc::Sender<Value> {
        self.payload_tx.clone()
    }

    pub fn matcher_stats(&self) -> MatcherStats {
        self.pool.stats()
    }

    fn triggers(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.triggers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Threat tasks not yet collected
    pub fn in_flight_triggers(&self) -> usize {
        let mut triggers = self.triggers();
        reap_trigger_tasks(&mut triggers);
        triggers.len()
    }

    /// Subscribe every protected token, drop subscriptions for the rest
    pub async fn sync_subscriptions(&self) -> Result<SubscriptionSync, OrchestratorError> {
        let wanted: BTreeSet<String> = self
            .store
            .list_active_positions()
            .await?
            .into_iter()
            .filter(|p| p.is_monitored())
            .map(|p| p.token_mint)
            .collect();
        let current: BTreeSet<String> = self.stream.subscribed().into_iter().collect();

        let mut sync = SubscriptionSync::default();
        for token in wanted.difference(&current) {
            match self.stream.subscribe(token, self.payload_tx.clone()).await {
                Ok(()) => sync.subscribed += 1,
                Err(e) => {
                    tracing::warn!("Subscribe to {} failed: {}", token, e);
                    sync.failed += 1;
                }
            }
        }
        for token in current.difference(&wanted) {
            self.stream.unsubscribe(token).await;
            sync.unsubscribed += 1;
        }
        if sync.subscribed + sync.unsubscribed > 0 {
            tracing::info!(
                "Stream subscriptions: +{} -{} ({} failed)",
                sync.subscribed,
                sync.unsubscribed,
                sync.failed
            );
        }
        Ok(sync)
    }

    /// Parse and queue a batch of payloads. Returns the number accepted.
    pub fn ingest(&self, payloads: Vec<Value>) -> usize {
        let mut tiers: [Vec<InboundEvent>; 4] = Default::default();
        for payload in &payloads {
            let event = InboundEvent::from_json(payload);
            let protected = event
                .token_mint()
                .map(|mint| self.orchestrator.is_protected(mint))
                .unwrap_or(false);
            let priority = self.pool.prioritize(&event, protected);
            tiers[priority.index()].push(event);
        }

        let mut accepted = 0;
        for priority in MessagePriority::ALL {
            let events = std::mem::take(&mut tiers[priority.index()]);
            if !events.is_empty() {
                accepted += self.pool.enqueue(events, priority);
            }
        }
        accepted
    }

    /// Spawn the intake and dispatch loops. Can be started once.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let payload_rx = self
            .payload_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(rx) = payload_rx {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move { this.intake_loop(rx).await }));
        }

        let results_rx = self
            .results_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(rx) = results_rx {
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move { this.dispatch_loop(rx).await }));
        }

        if handles.is_empty() {
            tracing::warn!("Ingest pipeline already started");
        }
        handles
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn intake_loop(&self, mut rx: mpsc::Receiver<Value>) {
        let mut shutdown = self.shutdown.subscribe();
        let max_batch = self.config.max_batch.max(1);
        loop {
            let first = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                payload = rx.recv() => match payload {
                    Some(p) => p,
                    None => break,
                },
            };
            let mut batch = vec![first];
            while batch.len() < max_batch {
                match rx.try_recv() {
                    Ok(p) => batch.push(p),
                    Err(_) => break,
                }
            }
            self.ingest(batch);
        }
        tracing::info!("Ingest intake stopped");
    }

    async fn dispatch_loop(&self, mut rx: mpsc::Receiver<ThreatEvent>) {
        let mut shutdown = self.shutdown.subscribe();
        let slots = self.orchestrator.trigger_slots();
        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                event = rx.recv() => match event {
                    Some(e) => e,
                    None => break,
                },
            };
            tracing::debug!(
                category = %event.category,
                rule = %event.matched_rule,
                signature = %event.signature,
                "Threat matched"
            );

            // Waits only while every trigger slot is taken
            let permit = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let orchestrator = Arc::clone(&self.orchestrator);
            let mut triggers = self.triggers();
            reap_trigger_tasks(&mut triggers);
            triggers.spawn(async move {
                let _permit = permit;
                match orchestrator.handle_threat(&event).await {
                    Ok(TriggerReport::Processed(outcomes)) => {
                        tracing::info!("Threat {} handled for {} positions", event.signature, outcomes.len())
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Threat {} not handled: {}", event.signature, e),
                }
            });
        }
        tracing::info!("Threat dispatch stopped");
    }

    /// Stop loops and the matcher pool, waiting up to `grace` for the loops
    /// and again for threats still being handled
    pub async fn shutdown(&self, handles: Vec<JoinHandle<()>>, grace: Duration) {
        self.stop();
        for handle in handles {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!("Ingest task did not stop within {:?}", grace);
            }
        }
        let mut triggers = std::mem::take(&mut *self.triggers());
        drain_trigger_tasks(&mut triggers, grace).await;
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::alerts::AlertDispatcher;
    use crate::application::exit_cache::{ExitCacheConfig, ExitTransactionCache};
    use crate::application::orchestrator::OrchestratorConfig;
    use crate::application::priority_sender::{PrioritySender, SenderConfig};
    use crate::domain::{MembershipFilter, ProtectionLevel};
    use crate::gateway::{BatchConfig, BatchRpcProcessor, GuardConfig, RpcGateway};
    use crate::matcher::{PoolConfig, RuleSet, DEFAULT_LARGE_SWAP_MIN_AMOUNT};
    use crate::ports::alerts::AlertKind;
    use crate::ports::mocks::{
        InMemoryCustody, InMemoryStore, MockChain, MockEventStream, MockTradeBuilder, RecordingAlertSink,
    };
    use serde_json::json;
    use solana_sdk::pubkey::Pubkey;

    struct Fixture {
        pipeline: Arc<IngestPipeline>,
        orchestrator: Arc<ProtectionOrchestrator>,
        stream: Arc<MockEventStream>,
        sink: Arc<RecordingAlertSink>,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(MockChain::new());
        let gateway = Arc::new(RpcGateway::new(chain, GuardConfig::default()));
        let batch = Arc::new(BatchRpcProcessor::spawn(gateway.clone(), BatchConfig::default()));
        let custody = Arc::new(InMemoryCustody::new());
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(ExitTransactionCache::new(
            batch,
            Arc::new(MockTradeBuilder::default()),
            custody.clone(),
            ExitCacheConfig::default(),
        ));
        let sink = Arc::new(RecordingAlertSink::new());
        let orchestrator = Arc::new(ProtectionOrchestrator::new(
            store.clone(),
            custody,
            cache,
            Arc::new(PrioritySender::new(gateway.clone(), None, SenderConfig::default())),
            gateway,
            Arc::new(AlertDispatcher::new(vec![sink.clone()])),
            MembershipFilter::default(),
            OrchestratorConfig::default(),
        ));
        let rules = RuleSet::default_rules(DEFAULT_LARGE_SWAP_MIN_AMOUNT).unwrap();
        let (pool, results_rx) = ThreatMatcherPool::start(Arc::new(rules), PoolConfig::default());
        let stream = Arc::new(MockEventStream::new());
        let pipeline = Arc::new(IngestPipeline::new(
            orchestrator.clone(),
            Arc::new(pool),
            results_rx,
            stream.clone(),
            store,
            IngestConfig::default(),
        ));
        Fixture {
            pipeline,
            orchestrator,
            stream,
            sink,
        }
    }

    fn removal(mint: &str, slot: u64) -> Value {
        json!({
            "signature": format!("sig{}", slot),
            "slot": slot,
            "token_mint": mint,
            "logs": ["Program log: Instruction: RemoveLiquidity"]
        })
    }

    #[tokio::test]
    async fn test_sync_subscriptions_follows_store() {
        let f = fixture();
        let mint = Pubkey::new_unique().to_string();
        let wallet = Pubkey::new_unique().to_string();
        f.orchestrator
            .enable_protection(&mint, &wallet, ProtectionLevel::Manual, false)
            .await
            .unwrap();

        let sync = f.pipeline.sync_subscriptions().await.unwrap();
        assert_eq!(sync.subscribed, 1);
        assert_eq!(f.stream.subscribed(), vec![mint.clone()]);

        f.orchestrator.disable_protection(&mint, &wallet).await.unwrap();
        let sync = f.pipeline.sync_subscriptions().await.unwrap();
        assert_eq!(sync.unsubscribed, 1);
        assert!(f.stream.subscribed().is_empty());
    }

    #[tokio::test]
    async fn test_unclassified_payloads_dropped() {
        let f = fixture();
        let accepted = f.pipeline.ingest(vec![json!({"jsonrpc": "2.0"}), json!(42)]);
        assert_eq!(accepted, 0);
        assert_eq!(f.pipeline.matcher_stats().unclassified, 2);
    }

    #[tokio::test]
    async fn test_stream_to_orchestrator() {
        let f = fixture();
        let mint = Pubkey::new_unique().to_string();
        f.orchestrator
            .enable_protection(&mint, &Pubkey::new_unique().to_string(), ProtectionLevel::Manual, false)
            .await
            .unwrap();
        f.pipeline.sync_subscriptions().await.unwrap();
        let handles = f.pipeline.start();

        assert!(f.stream.emit(&mint, removal(&mint, 7)).await);

        let mut notified = false;
        for _ in 0..100 {
            f.orchestrator.alerts().drain().await;
            if f.sink.count(AlertKind::ManualActionRequired) == 1 {
                notified = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(notified);
        assert!(f.pipeline.matcher_stats().matched >= 1);

        f.pipeline.shutdown(handles, Duration::from_secs(1)).await;
    }
}
