//! Service graph
//!
//! Every shared service is constructed once here and handed out as an `Arc`.
//! `build` wires the production adapters; `from_ports` takes any port
//! implementations so the whole graph can run against mocks.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::alerts::AlertDispatcher;
use super::exit_cache::{ExitCacheConfig, ExitTransactionCache};
use super::ingest::{IngestConfig, IngestPipeline};
use super::monitor::{MonitorConfig, ProtectionMonitor};
use super::orchestrator::{OrchestratorConfig, OrchestratorError, ProtectionOrchestrator};
use super::priority_sender::{PrioritySender, SenderConfig};
use crate::adapters::alerts::{LogAlertSink, TelegramAlertSink};
use crate::adapters::jito::{JitoBundleClient, JitoConfig, JitoError};
use crate::adapters::jupiter::{JupiterClient, JupiterConfig};
use crate::adapters::market_data::DexScreenerClient;
use crate::adapters::solana::{KeystoreCustody, SolanaClient, SolanaLogStream};
use crate::adapters::store::JsonFileStore;
use crate::config::Config;
use crate::domain::{VelocityThresholds, VelocityTracker};
use crate::gateway::{BatchConfig, BatchRpcProcessor, GuardedTradeBuilder, RpcGateway};
use crate::matcher::{MessageClassifier, PoolConfig, RuleSet, ThreatMatcherPool};
use crate::ports::alerts::{AlertError, AlertSink};
use crate::ports::chain::{BundleRelay, ChainRpc};
use crate::ports::custody::KeyCustody;
use crate::ports::market::{MarketDataError, MarketDataSource};
use crate::ports::store::{ProtectionStore, StoreError};
use crate::ports::stream::EventStream;
use crate::ports::trade::{TradeBuilder, TradeError};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Store: {0}")]
    Store(#[from] StoreError),
    #[error("Trade builder: {0}")]
    Trade(#[from] TradeError),
    #[error("Bundle relay: {0}")]
    Relay(#[from] JitoError),
    #[error("Alert sink: {0}")]
    Alerts(#[from] AlertError),
    #[error("Market data: {0}")]
    Market(#[from] MarketDataError),
    #[error("Threat rules: {0}")]
    Rules(#[from] regex::Error),
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// External dependencies of the service graph
pub struct Ports {
    pub chain: Arc<dyn ChainRpc>,
    pub relay: Option<Arc<dyn BundleRelay>>,
    pub trade: Arc<dyn TradeBuilder>,
    pub store: Arc<dyn ProtectionStore>,
    pub custody: Arc<dyn KeyCustody>,
    pub market: Arc<dyn MarketDataSource>,
    pub sinks: Vec<Arc<dyn AlertSink>>,
}

pub struct AppContext {
    pub config: Config,
    pub gateway: Arc<RpcGateway>,
    pub batch: Arc<BatchRpcProcessor>,
    pub trade: Arc<GuardedTradeBuilder>,
    pub store: Arc<dyn ProtectionStore>,
    pub custody: Arc<dyn KeyCustody>,
    pub market: Arc<dyn MarketDataSource>,
    pub cache: Arc<ExitTransactionCache>,
    pub sender: Arc<PrioritySender>,
    pub alerts: Arc<AlertDispatcher>,
    pub tracker: Arc<VelocityTracker>,
    pub orchestrator: Arc<ProtectionOrchestrator>,
}

/// Production adapters for `config`
pub async fn production_ports(config: &Config) -> Result<Ports, ContextError> {
    let chain: Arc<dyn ChainRpc> = Arc::new(
        SolanaClient::new(config.solana.rpc_url.clone())
            .with_skip_preflight(config.solana.skip_preflight)
            .with_max_accounts_per_call(config.solana.max_accounts_per_call),
    );

    let relay: Option<Arc<dyn BundleRelay>> = if config.jito.enabled {
        let client = JitoBundleClient::with_config(JitoConfig::from(&config.jito))?;
        tracing::info!("Jito relay enabled: {}", client.block_engine_url());
        Some(Arc::new(client))
    } else {
        None
    };

    let trade: Arc<dyn TradeBuilder> = Arc::new(JupiterClient::with_config(JupiterConfig::from(&config.jupiter))?);
    let store: Arc<dyn ProtectionStore> = Arc::new(JsonFileStore::open(config.store.data_path()).await?);
    let custody: Arc<dyn KeyCustody> = Arc::new(KeystoreCustody::new(config.store.keystore_path()));
    let market: Arc<dyn MarketDataSource> = Arc::new(DexScreenerClient::new()?);

    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
    if config.alerts.log_alerts {
        sinks.push(Arc::new(LogAlertSink));
    }
    if config.alerts.telegram_enabled {
        sinks.push(Arc::new(TelegramAlertSink::new(
            config.alerts.telegram_bot_token.clone(),
            config.alerts.telegram_chat_id.clone(),
        )?));
        tracing::info!("Telegram alerts enabled");
    }

    Ok(Ports {
        chain,
        relay,
        trade,
        store,
        custody,
        market,
        sinks,
    })
}

impl AppContext {
    /// Wire the production graph. Must run inside a Tokio runtime.
    pub async fn build(config: Config) -> Result<Self, ContextError> {
        let ports = production_ports(&config).await?;
        Ok(Self::from_ports(config, ports))
    }

    pub fn from_ports(config: Config, ports: Ports) -> Self {
        let gateway = Arc::new(RpcGateway::new(ports.chain, config.gateway.rpc_guard()));
        let batch = Arc::new(BatchRpcProcessor::spawn(gateway.clone(), BatchConfig::from(&config.batch)));
        let trade = Arc::new(GuardedTradeBuilder::new(ports.trade, config.gateway.trade_guard()));

        let cache = Arc::new(ExitTransactionCache::new(
            batch.clone(),
            trade.clone(),
            ports.custody.clone(),
            ExitCacheConfig::from(&config.exit),
        ));
        let sender = Arc::new(PrioritySender::new(
            gateway.clone(),
            ports.relay,
            SenderConfig::from(&config.sender),
        ));
        let alerts = Arc::new(AlertDispatcher::new(ports.sinks));
        let tracker = Arc::new(VelocityTracker::new(VelocityThresholds::from(&config.velocity)));

        let orchestrator = Arc::new(ProtectionOrchestrator::new(
            ports.store.clone(),
            ports.custody.clone(),
            cache.clone(),
            sender.clone(),
            gateway.clone(),
            alerts.clone(),
            config.orchestrator.filter(),
            OrchestratorConfig::from(&config.orchestrator),
        ));

        Self {
            config,
            gateway,
            batch,
            trade,
            store: ports.store,
            custody: ports.custody,
            market: ports.market,
            cache,
            sender,
            alerts,
            tracker,
            orchestrator,
        }
    }

    pub fn monitor(&self) -> Arc<ProtectionMonitor> {
        Arc::new(ProtectionMonitor::new(
            self.orchestrator.clone(),
            self.tracker.clone(),
            self.market.clone(),
            self.store.clone(),
            MonitorConfig::from(&self.config.monitor),
        ))
    }

    /// Start the reactive pipeline and the periodic monitor
    pub async fn start(&self, stream: Arc<dyn EventStream>) -> Result<RunningServices, ContextError> {
        let loaded = self.orchestrator.rebuild_filter().await?;
        tracing::info!("🛡️  {} protected positions loaded", loaded);

        let rules: Arc<dyn MessageClassifier> = Arc::new(RuleSet::default_rules(self.config.matcher.large_swap_min_amount)?);
        let (pool, results_rx) = ThreatMatcherPool::start(rules, PoolConfig::from(&self.config.matcher));
        let ingest = Arc::new(IngestPipeline::new(
            self.orchestrator.clone(),
            Arc::new(pool),
            results_rx,
            stream,
            self.store.clone(),
            IngestConfig::from(&self.config.matcher),
        ));
        let ingest_handles = ingest.start();

        let monitor = self.monitor();
        let monitor_handle = {
            let monitor = monitor.clone();
            tokio::spawn(async move {
                if let Err(e) = monitor.run().await {
                    tracing::error!("Protection monitor exited: {}", e);
                }
            })
        };

        let sync_interval = Duration::from_secs(self.config.monitor.subscription_sync_interval_secs.max(1));
        let sync_handle = {
            let ingest = ingest.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(sync_interval);
                tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    match ingest.sync_subscriptions().await {
                        Ok(sync) if sync.failed > 0 => {
                            tracing::warn!("Stream sync: {} subscribe failures", sync.failed)
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!("Stream sync failed: {}", e),
                    }
                }
            })
        };

        Ok(RunningServices {
            ingest,
            monitor,
            ingest_handles,
            monitor_handle,
            sync_handle,
        })
    }
}

/// Handles for everything `AppContext::start` spawned
pub struct RunningServices {
    pub ingest: Arc<IngestPipeline>,
    pub monitor: Arc<ProtectionMonitor>,
    ingest_handles: Vec<JoinHandle<()>>,
    monitor_handle: JoinHandle<()>,
    sync_handle: JoinHandle<()>,
}

impl RunningServices {
    /// In-flight exits keep running in their own tasks; only the loops stop
    pub async fn shutdown(self, grace: Duration) {
        self.sync_handle.abort();
        self.monitor.stop().await;
        self.ingest.shutdown(self.ingest_handles, grace).await;
        if tokio::time::timeout(grace, self.monitor_handle).await.is_err() {
            tracing::warn!("Protection monitor did not stop within {:?}", grace);
        }
        self.monitor.drain_triggers(grace).await;
    }
}

/// Convenience for the CLI: the production log stream for `config`
pub fn production_stream(config: &Config) -> Arc<dyn EventStream> {
    Arc::new(SolanaLogStream::new(config.solana.ws_url.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProtectionLevel;
    use crate::ports::mocks::{
        InMemoryCustody, InMemoryStore, MockChain, MockEventStream, MockTradeBuilder, RecordingAlertSink,
        StaticMarketData,
    };
    use solana_sdk::pubkey::Pubkey;

    fn mock_ports(store: Arc<InMemoryStore>) -> Ports {
        Ports {
            chain: Arc::new(MockChain::new()),
            relay: None,
            trade: Arc::new(MockTradeBuilder::default()),
            store,
            custody: Arc::new(InMemoryCustody::new()),
            market: Arc::new(StaticMarketData::new()),
            sinks: vec![Arc::new(RecordingAlertSink::new())],
        }
    }

    #[tokio::test]
    async fn test_graph_wires_from_config() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = AppContext::from_ports(Config::default(), mock_ports(store.clone()));

        let mint = Pubkey::new_unique().to_string();
        let wallet = Pubkey::new_unique().to_string();
        ctx.orchestrator
            .enable_protection(&mint, &wallet, ProtectionLevel::Manual, false)
            .await
            .unwrap();

        assert!(ctx.orchestrator.is_protected(&mint));
        assert!(store.position(&mint, &wallet).is_some());
        assert_eq!(ctx.gateway.health().name, "rpc");
    }

    #[tokio::test]
    async fn test_start_loads_filter_and_stops() {
        let store = Arc::new(InMemoryStore::new());
        let mint = Pubkey::new_unique().to_string();
        let wallet = Pubkey::new_unique().to_string();
        let position =
            crate::domain::ProtectedPosition::new(&mint, &wallet, ProtectionLevel::Manual, false).unwrap();
        store.upsert_position(&position).await.unwrap();

        let ctx = AppContext::from_ports(Config::default(), mock_ports(store));
        assert!(!ctx.orchestrator.is_protected(&mint));

        let stream = Arc::new(MockEventStream::new());
        let running = ctx.start(stream.clone()).await.unwrap();
        assert!(ctx.orchestrator.is_protected(&mint));

        // First sync tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stream.subscribed(), vec![mint]);

        running.shutdown(Duration::from_secs(2)).await;
    }
}
