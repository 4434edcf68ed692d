//! Protection Orchestrator
//!
//! Owns the position lifecycle and the trigger path: dedup, membership
//! check, then one isolated exit task per protected wallet. Every outcome
//! is persisted before it is alerted.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::alerts::{AlertDispatcher, DispatchStats};
use super::exit_cache::{CacheError, CacheLookup, CacheStats, ExitTransactionCache, RefreshSummary};
use super::priority_sender::{PrioritySender, SendOutcome, SenderStats};
use crate::adapters::solana::token_account::parse_pubkey;
use crate::domain::event_dedup::{EventDeduplicator, DEFAULT_DEDUP_TTL};
use crate::domain::{
    ExecutionErrorKind, ExecutionResult, FilterStats, MembershipFilter, PositionError, PositionKey, PositionStatus,
    ProtectedPosition, ProtectionLevel, ProtectionTrigger, Severity, ThreatEvent, TriggerReason, VelocitySnapshot,
};
use crate::gateway::{GuardHealth, RpcGateway};
use crate::ports::alerts::{Alert, AlertKind};
use crate::ports::chain::ConfirmationStatus;
use crate::ports::custody::KeyCustody;
use crate::ports::store::{AuditEvent, AuditKind, ProtectionStore, StoreError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Position error: {0}")]
    Position(#[from] PositionError),
    #[error("No protection for {0}")]
    NotFound(PositionKey),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Threats below this severity are ignored
    pub severity_threshold: Severity,
    pub dedup_ttl: Duration,
    /// Rebuilds allowed after a blockhash expiry
    pub expired_rebuilds: u32,
    /// Warm the exit cache when protection is enabled
    pub warm_on_enable: bool,
    /// Triggers handled at once by the stream dispatcher and the monitor
    pub max_concurrent_triggers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            severity_threshold: Severity::Medium,
            dedup_ttl: DEFAULT_DEDUP_TTL,
            expired_rebuilds: 1,
            warm_on_enable: true,
            max_concurrent_triggers: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Executed,
    Failed,
    TimedOut,
    MissingKey,
    ManualNotified,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionOutcome {
    pub key: PositionKey,
    pub kind: OutcomeKind,
    pub result: Option<ExecutionResult>,
    pub detail: String,
}

impl PositionOutcome {
    fn skipped(key: PositionKey, detail: impl Into<String>) -> Self {
        Self {
            key,
            kind: OutcomeKind::Skipped,
            result: None,
            detail: detail.into(),
        }
    }
}

/// What a trigger led to
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerReport {
    Duplicate,
    /// Filter negative, store untouched
    NotProtected,
    BelowThreshold,
    /// Threat without a token mint
    Unroutable,
    NoAction,
    Processed(Vec<PositionOutcome>),
}

impl TriggerReport {
    pub fn outcomes(&self) -> &[PositionOutcome] {
        match self {
            TriggerReport::Processed(outcomes) => outcomes,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorCounters {
    pub triggers: u64,
    pub duplicates: u64,
    pub filter_negatives: u64,
    pub attempts: u64,
    pub executed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub missing_keys: u64,
    pub manual_notifications: u64,
}

#[derive(Debug, Default)]
struct Counters {
    triggers: AtomicU64,
    duplicates: AtomicU64,
    filter_negatives: AtomicU64,
    attempts: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    missing_keys: AtomicU64,
    manual_notifications: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionReport {
    pub position: ProtectedPosition,
    pub cached_variants: usize,
    pub presigned: bool,
    pub cache_age_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStatus {
    pub filter: FilterStats,
    pub gateway: GuardHealth,
    pub cache: CacheStats,
    pub sender: SenderStats,
    pub alerts: DispatchStats,
    pub counters: OrchestratorCounters,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub checked: usize,
    pub executed: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Removes the in-flight marker even if the task unwinds
struct InFlight<'a> {
    map: &'a DashMap<PositionKey, Instant>,
    key: PositionKey,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.map.remove(&self.key);
    }
}

pub struct ProtectionOrchestrator {
    store: Arc<dyn ProtectionStore>,
    custody: Arc<dyn KeyCustody>,
    cache: Arc<ExitTransactionCache>,
    sender: Arc<PrioritySender>,
    gateway: Arc<RpcGateway>,
    alerts: Arc<AlertDispatcher>,
    filter: RwLock<MembershipFilter>,
    dedup: Mutex<EventDeduplicator>,
    in_flight: DashMap<PositionKey, Instant>,
    trigger_slots: Arc<Semaphore>,
    config: OrchestratorConfig,
    counters: Counters,
}

/// Wait up to `grace` for spawned trigger tasks, then abort the rest.
/// An aborted exit leaves its position triggered without a signature,
/// which the next trigger picks up again.
pub async fn drain_trigger_tasks(tasks: &mut JoinSet<()>, grace: Duration) {
    if tasks.is_empty() {
        return;
    }
    let drained = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Trigger task ended abnormally: {}", e);
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("{} trigger tasks still running after {:?}, aborting", tasks.len(), grace);
        tasks.shutdown().await;
    }
}

/// Collect trigger tasks that already finished
pub fn reap_trigger_tasks(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        if let Err(e) = joined {
            tracing::error!("Trigger task ended abnormally: {}", e);
        }
    }
}

impl ProtectionOrchestrator {
    pub fn new(
        store: Arc<dyn ProtectionStore>,
        custody: Arc<dyn KeyCustody>,
        cache: Arc<ExitTransactionCache>,
        sender: Arc<PrioritySender>,
        gateway: Arc<RpcGateway>,
        alerts: Arc<AlertDispatcher>,
        filter: MembershipFilter,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            custody,
            cache,
            sender,
            gateway,
            alerts,
            filter: RwLock::new(filter),
            dedup: Mutex::new(EventDeduplicator::new(config.dedup_ttl)),
            in_flight: DashMap::new(),
            trigger_slots: Arc::new(Semaphore::new(config.max_concurrent_triggers.max(1))),
            config,
            counters: Counters::default(),
        }
    }

    fn filter_read(&self) -> RwLockReadGuard<'_, MembershipFilter> {
        self.filter.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn filter_write(&self) -> RwLockWriteGuard<'_, MembershipFilter> {
        self.filter.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dedup(&self) -> MutexGuard<'_, EventDeduplicator> {
        self.dedup.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_protected(&self, token_mint: &str) -> bool {
        self.filter_read().contains(token_mint)
    }

    pub fn alerts(&self) -> &Arc<AlertDispatcher> {
        &self.alerts
    }

    /// Shared bound on concurrently handled triggers
    pub fn trigger_slots(&self) -> Arc<Semaphore> {
        Arc::clone(&self.trigger_slots)
    }

    pub fn cache(&self) -> &Arc<ExitTransactionCache> {
        &self.cache
    }

    async fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.store.append_audit_event(&event).await {
            tracing::error!("Failed to append audit event {:?} for {}: {}", event.kind, event.token_mint, e);
        }
    }

    async fn load(&self, token_mint: &str, wallet: &str) -> Result<ProtectedPosition, OrchestratorError> {
        self.store
            .get_position(token_mint, wallet)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(PositionKey::new(token_mint, wallet)))
    }

    // ------------------------------------------------------------------
    // Control operations
    // ------------------------------------------------------------------

    pub async fn enable_protection(
        &self,
        token_mint: &str,
        wallet: &str,
        level: ProtectionLevel,
        is_demo: bool,
    ) -> Result<ProtectedPosition, OrchestratorError> {
        parse_pubkey(token_mint).map_err(|e| OrchestratorError::InvalidInput(e.to_string()))?;
        parse_pubkey(wallet).map_err(|e| OrchestratorError::InvalidInput(e.to_string()))?;

        let (position, newly_counted) = match self.store.get_position(token_mint, wallet).await? {
            Some(mut existing) if existing.is_active => {
                existing.update_level(level)?;
                existing.is_demo = is_demo;
                (existing, false)
            }
            Some(mut existing) => {
                existing.reactivate(level, is_demo);
                (existing, true)
            }
            None => (ProtectedPosition::new(token_mint, wallet, level, is_demo)?, true),
        };

        self.store.upsert_position(&position).await?;
        if newly_counted {
            self.filter_write().add(token_mint);
        }
        self.audit(AuditEvent::new(
            AuditKind::ProtectionEnabled,
            token_mint,
            Some(wallet),
            format!("level={} demo={}", level, is_demo),
        ))
        .await;
        tracing::info!("Protection enabled for {} ({}, demo={})", position.key(), level, is_demo);

        if self.config.warm_on_enable && level == ProtectionLevel::Automatic && !is_demo {
            if let Err(e) = self.cache.refresh(&position).await {
                tracing::warn!("Cache warm for {} failed: {}", position.key(), e);
            }
        }
        Ok(position)
    }

    pub async fn disable_protection(
        &self,
        token_mint: &str,
        wallet: &str,
    ) -> Result<ProtectedPosition, OrchestratorError> {
        let mut position = self.load(token_mint, wallet).await?;
        if !position.is_active {
            return Ok(position);
        }
        position.deactivate();
        self.store.upsert_position(&position).await?;
        self.filter_write().remove(token_mint);
        self.cache.invalidate(&position.key());
        self.audit(AuditEvent::new(AuditKind::ProtectionDisabled, token_mint, Some(wallet), "disabled by owner"))
            .await;
        tracing::info!("Protection disabled for {}", position.key());
        Ok(position)
    }

    pub async fn pause_protection(&self, token_mint: &str, wallet: &str) -> Result<ProtectedPosition, OrchestratorError> {
        let mut position = self.load(token_mint, wallet).await?;
        position.pause()?;
        self.store.upsert_position(&position).await?;
        self.cache.invalidate(&position.key());
        self.audit(AuditEvent::new(AuditKind::ProtectionPaused, token_mint, Some(wallet), "paused"))
            .await;
        Ok(position)
    }

    pub async fn resume_protection(
        &self,
        token_mint: &str,
        wallet: &str,
    ) -> Result<ProtectedPosition, OrchestratorError> {
        let mut position = self.load(token_mint, wallet).await?;
        position.resume()?;
        self.store.upsert_position(&position).await?;
        self.audit(AuditEvent::new(AuditKind::ProtectionResumed, token_mint, Some(wallet), "resumed"))
            .await;
        if position.level == ProtectionLevel::Automatic && !position.is_demo {
            if let Err(e) = self.cache.refresh(&position).await {
                tracing::warn!("Cache warm for {} failed: {}", position.key(), e);
            }
        }
        Ok(position)
    }

    pub async fn update_level(
        &self,
        token_mint: &str,
        wallet: &str,
        level: ProtectionLevel,
    ) -> Result<ProtectedPosition, OrchestratorError> {
        let mut position = self.load(token_mint, wallet).await?;
        let previous = position.level;
        position.update_level(level)?;
        self.store.upsert_position(&position).await?;
        self.audit(AuditEvent::new(
            AuditKind::SettingsUpdated,
            token_mint,
            Some(wallet),
            format!("level {} -> {}", previous, level),
        ))
        .await;
        if level == ProtectionLevel::Manual {
            self.cache.invalidate(&position.key());
        }
        Ok(position)
    }

    /// Rebuild cached exits for every active position on a token
    pub async fn force_refresh(&self, token_mint: &str) -> Result<RefreshSummary, OrchestratorError> {
        let positions: Vec<ProtectedPosition> = self
            .store
            .get_active_positions_for_token(token_mint)
            .await?
            .into_iter()
            .filter(|p| p.level == ProtectionLevel::Automatic && !p.is_demo)
            .collect();
        Ok(self.cache.refresh_all(&positions).await)
    }

    /// Refresh every automatic, monitored position. Used by the monitor.
    pub async fn refresh_all_caches(&self) -> Result<RefreshSummary, OrchestratorError> {
        let positions: Vec<ProtectedPosition> = self
            .store
            .list_active_positions()
            .await?
            .into_iter()
            .filter(|p| p.level == ProtectionLevel::Automatic && !p.is_demo)
            .collect();
        self.observe_block_height().await;
        Ok(self.cache.refresh_all(&positions).await)
    }

    /// Feed the current chain height to the cache so expired variants
    /// read as stale before their TTL runs out
    async fn observe_block_height(&self) {
        match self.gateway.get_block_height().await {
            Ok(height) => self.cache.observe_block_height(height),
            Err(e) => tracing::debug!("Block height read failed: {}", e),
        }
    }

    pub async fn position_status(
        &self,
        token_mint: &str,
        wallet: &str,
    ) -> Result<Option<PositionReport>, OrchestratorError> {
        let Some(position) = self.store.get_position(token_mint, wallet).await? else {
            return Ok(None);
        };
        let variants = self.cache.variants(&position.key());
        Ok(Some(PositionReport {
            cached_variants: variants.len(),
            presigned: variants.first().map(|v| v.presigned).unwrap_or(false),
            cache_age_ms: variants.first().map(|v| v.age().as_millis() as u64),
            position,
        }))
    }

    pub fn counters(&self) -> OrchestratorCounters {
        OrchestratorCounters {
            triggers: self.counters.triggers.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            filter_negatives: self.counters.filter_negatives.load(Ordering::Relaxed),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            executed: self.counters.executed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            missing_keys: self.counters.missing_keys.load(Ordering::Relaxed),
            manual_notifications: self.counters.manual_notifications.load(Ordering::Relaxed),
        }
    }

    pub fn monitoring_status(&self) -> MonitoringStatus {
        let gateway = self.gateway.health();
        MonitoringStatus {
            filter: self.filter_read().stats(),
            degraded: gateway.is_degraded(),
            gateway,
            cache: self.cache.stats(),
            sender: self.sender.stats(),
            alerts: self.alerts.stats(),
            counters: self.counters(),
        }
    }

    /// Repopulate the filter from the store, one count per active position
    pub async fn rebuild_filter(&self) -> Result<usize, OrchestratorError> {
        let positions = self.store.list_active_positions().await?;
        let mut filter = self.filter_write();
        filter.clear();
        for position in &positions {
            filter.add(&position.token_mint);
        }
        tracing::info!("Membership filter rebuilt with {} positions", positions.len());
        Ok(positions.len())
    }

    /// Resolve triggered positions that hold a pending exit signature
    pub async fn reconcile_pending(&self) -> Result<ReconcileSummary, OrchestratorError> {
        let mut summary = ReconcileSummary::default();
        let pending: Vec<ProtectedPosition> = self
            .store
            .list_active_positions()
            .await?
            .into_iter()
            .filter(|p| p.status == PositionStatus::Triggered && p.exit_signature.is_some())
            .collect();

        for mut position in pending {
            let Some(signature) = position.exit_signature.clone() else {
                continue;
            };
            summary.checked += 1;
            let status = match self.sender.check_status(&signature).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::warn!("Reconcile status check for {} failed: {}", signature, e);
                    summary.pending += 1;
                    continue;
                }
            };

            let key = position.key();
            match status {
                Some(s) if s.is_landed() => {
                    position.mark_executed(signature.clone())?;
                    self.store.upsert_position(&position).await?;
                    self.filter_write().remove(&position.token_mint);
                    self.cache.invalidate(&key);
                    self.audit(
                        AuditEvent::new(AuditKind::Reconciled, &key.token_mint, Some(&key.wallet), "exit landed")
                            .with_signature(Some(signature.clone())),
                    )
                    .await;
                    self.alerts.dispatch(
                        Alert::new(
                            AlertKind::ExitExecuted,
                            Severity::High,
                            &key.token_mint,
                            format!("Pending exit {} confirmed on chain", signature),
                        )
                        .with_wallet(&key.wallet),
                    );
                    summary.executed += 1;
                }
                Some(ConfirmationStatus::Failed(reason)) => {
                    position.revert_to_active()?;
                    self.store.upsert_position(&position).await?;
                    self.audit(
                        AuditEvent::new(
                            AuditKind::Reconciled,
                            &key.token_mint,
                            Some(&key.wallet),
                            format!("exit failed on chain: {}", reason),
                        )
                        .with_signature(Some(signature.clone())),
                    )
                    .await;
                    self.alerts.dispatch(
                        Alert::new(
                            AlertKind::ExitFailed,
                            Severity::High,
                            &key.token_mint,
                            format!("Pending exit {} failed: {}", signature, reason),
                        )
                        .with_wallet(&key.wallet),
                    );
                    summary.failed += 1;
                }
                _ => summary.pending += 1,
            }
        }
        Ok(summary)
    }

    // ------------------------------------------------------------------
    // Trigger path
    // ------------------------------------------------------------------

    pub async fn handle_threat(self: &Arc<Self>, event: &ThreatEvent) -> Result<TriggerReport, OrchestratorError> {
        let Some(trigger) = ProtectionTrigger::from_threat(event) else {
            return Ok(TriggerReport::Unroutable);
        };
        if trigger.severity < self.config.severity_threshold {
            return Ok(TriggerReport::BelowThreshold);
        }
        self.handle_trigger(trigger).await
    }

    pub async fn handle_velocity(
        self: &Arc<Self>,
        snapshot: &VelocitySnapshot,
    ) -> Result<TriggerReport, OrchestratorError> {
        if !snapshot.needs_immediate_check() {
            return Ok(TriggerReport::NoAction);
        }
        let alerts = snapshot.alerts;
        let severity = if alerts.flash_rug {
            Severity::Critical
        } else if alerts.rapid_drain {
            Severity::High
        } else {
            Severity::Medium
        };
        if severity < self.config.severity_threshold {
            return Ok(TriggerReport::BelowThreshold);
        }
        self.handle_trigger(ProtectionTrigger {
            token_mint: snapshot.token_mint.clone(),
            severity,
            detected_at: snapshot.latest.timestamp_ms,
            reason: TriggerReason::Velocity {
                flags: alerts.flags(),
                liquidity_change_1m: snapshot.one_minute.liquidity_change_pct,
                liquidity_change_5m: snapshot.five_minutes.liquidity_change_pct,
            },
        })
        .await
    }

    pub async fn handle_trigger(
        self: &Arc<Self>,
        trigger: ProtectionTrigger,
    ) -> Result<TriggerReport, OrchestratorError> {
        self.counters.triggers.fetch_add(1, Ordering::Relaxed);
        let event_key = trigger.event_key();

        if !self.dedup().check_and_insert(&event_key, Instant::now()) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Duplicate trigger {} suppressed", event_key);
            return Ok(TriggerReport::Duplicate);
        }

        if !self.is_protected(&trigger.token_mint) {
            self.counters.filter_negatives.fetch_add(1, Ordering::Relaxed);
            return Ok(TriggerReport::NotProtected);
        }

        let positions = match self.store.get_active_positions_for_token(&trigger.token_mint).await {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Store unavailable while handling {}: {}", event_key, e);
                // Nothing was attempted; a redelivery must not be suppressed
                self.dedup().remove(&event_key);
                self.alerts.dispatch(
                    Alert::new(
                        AlertKind::InfrastructureDegraded,
                        trigger.severity,
                        &trigger.token_mint,
                        format!("Could not load protected positions: {}", e),
                    )
                    .with_metadata(serde_json::json!({ "event_key": event_key })),
                );
                return Err(e.into());
            }
        };

        tracing::warn!(
            token = %trigger.token_mint,
            severity = %trigger.severity,
            positions = positions.len(),
            "Protection trigger: {}",
            trigger.reason
        );

        let trigger = Arc::new(trigger);
        let mut tasks = JoinSet::new();
        for position in positions.into_iter().filter(|p| p.is_monitored()) {
            let this = Arc::clone(self);
            let trigger = trigger.clone();
            tasks.spawn(async move {
                match position.level {
                    ProtectionLevel::Automatic => this.execute_position(position, &trigger).await,
                    ProtectionLevel::Manual => this.notify_manual(position, &trigger).await,
                }
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("Position task for {} aborted: {}", trigger.token_mint, e),
            }
        }
        Ok(TriggerReport::Processed(outcomes))
    }

    async fn notify_manual(&self, mut position: ProtectedPosition, trigger: &ProtectionTrigger) -> PositionOutcome {
        let key = position.key();
        position.record_alert(Utc::now());
        if let Err(e) = self.store.upsert_position(&position).await {
            tracing::error!("Failed to persist manual alert for {}: {}", key, e);
        }
        self.audit(AuditEvent::new(
            AuditKind::ManualNotification,
            &key.token_mint,
            Some(&key.wallet),
            trigger.reason.to_string(),
        ))
        .await;
        self.counters.manual_notifications.fetch_add(1, Ordering::Relaxed);
        self.alerts.dispatch(
            Alert::new(
                AlertKind::ManualActionRequired,
                trigger.severity,
                &key.token_mint,
                format!("{} - consider exiting manually", trigger.reason),
            )
            .with_wallet(&key.wallet),
        );
        PositionOutcome {
            key,
            kind: OutcomeKind::ManualNotified,
            result: None,
            detail: trigger.reason.to_string(),
        }
    }

    async fn execute_position(&self, mut position: ProtectedPosition, trigger: &ProtectionTrigger) -> PositionOutcome {
        let key = position.key();
        if position.status == PositionStatus::Triggered && position.exit_signature.is_some() {
            return PositionOutcome::skipped(key, "exit pending reconciliation");
        }
        if self.in_flight.insert(key.clone(), Instant::now()).is_some() {
            return PositionOutcome::skipped(key, "exit already in flight");
        }
        let _in_flight = InFlight {
            map: &self.in_flight,
            key: key.clone(),
        };

        if let Err(e) = position.trigger(Utc::now()) {
            return PositionOutcome::skipped(key, e.to_string());
        }
        if let Err(e) = self.store.upsert_position(&position).await {
            tracing::error!("Failed to persist trigger for {}: {}", key, e);
            self.alerts.dispatch(
                Alert::new(
                    AlertKind::InfrastructureDegraded,
                    trigger.severity,
                    &key.token_mint,
                    format!("Exit not attempted, store unavailable: {}", e),
                )
                .with_wallet(&key.wallet),
            );
            return PositionOutcome::skipped(key, e.to_string());
        }
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);
        self.audit(AuditEvent::new(
            AuditKind::ExecutionAttempt,
            &key.token_mint,
            Some(&key.wallet),
            trigger.reason.to_string(),
        ))
        .await;

        let result = if position.is_demo {
            simulate_exit()
        } else {
            self.attempt_exit(&position, trigger.severity).await
        };

        self.finalize(position, trigger, result).await
    }

    /// Presigned cache first, on-demand build otherwise
    async fn attempt_exit(&self, position: &ProtectedPosition, severity: Severity) -> ExecutionResult {
        let start = Instant::now();
        let key = position.key();
        let mut builds_allowed = 1 + self.config.expired_rebuilds;

        match self.cache.lookup(&key, severity) {
            CacheLookup::Fresh(variant) if variant.presigned => {
                tracing::info!("Using presigned {} exit for {}", variant.priority, key);
                match self.sender.submit(&variant.transaction, severity).await {
                    SendOutcome::Expired { .. } => {
                        tracing::warn!("Presigned exit for {} expired, rebuilding", key);
                        builds_allowed = self.config.expired_rebuilds;
                    }
                    outcome => return outcome.into_result(true),
                }
            }
            CacheLookup::Fresh(_) => tracing::info!("Cached exit for {} is unsigned, building", key),
            CacheLookup::Stale(_) => tracing::info!("Cached exit for {} is stale, building", key),
            CacheLookup::Missing => tracing::info!("No cached exit for {}, building", key),
        }

        for _ in 0..builds_allowed {
            let keypair = match self.custody.signing_key(&position.wallet).await {
                Ok(kp) => kp,
                Err(e) => {
                    return ExecutionResult::failure(
                        ExecutionErrorKind::CapabilityUnavailable,
                        e.to_string(),
                        None,
                        start.elapsed(),
                        false,
                    )
                }
            };
            let built = self.cache.build_on_demand(position, severity, &keypair).await;
            drop(keypair);

            let variant = match built {
                Ok(v) => v,
                Err(e) => {
                    let kind = match &e {
                        CacheError::NothingToSell(_) => ExecutionErrorKind::NoRoute,
                        CacheError::NoVariants { .. } => ExecutionErrorKind::Transient,
                        CacheError::InvalidPosition(_) => ExecutionErrorKind::InvalidInput,
                        CacheError::Balance(g) if g.is_infrastructure() => ExecutionErrorKind::Unavailable,
                        CacheError::Balance(_) => ExecutionErrorKind::InvalidInput,
                    };
                    return ExecutionResult::failure(kind, e.to_string(), None, start.elapsed(), false);
                }
            };

            match self.sender.submit(&variant.transaction, severity).await {
                SendOutcome::Expired { .. } => {
                    tracing::warn!("On-demand exit for {} expired, rebuilding", key);
                }
                outcome => {
                    let mut result = outcome.into_result(false);
                    result.elapsed_ms = start.elapsed().as_millis() as u64;
                    return result;
                }
            }
        }

        ExecutionResult::failure(
            ExecutionErrorKind::StaleCache,
            "blockhash expired on every rebuild",
            None,
            start.elapsed(),
            false,
        )
    }

    async fn finalize(
        &self,
        mut position: ProtectedPosition,
        trigger: &ProtectionTrigger,
        result: ExecutionResult,
    ) -> PositionOutcome {
        let key = position.key();
        let disabled_in_flight = matches!(
            self.store.get_position(&key.token_mint, &key.wallet).await,
            Ok(Some(ref current)) if !current.is_active
        );

        let (kind, audit_kind, alert_kind) = if result.success {
            (OutcomeKind::Executed, AuditKind::ExecutionSucceeded, AlertKind::ExitExecuted)
        } else if result.is_missing_key() {
            (OutcomeKind::MissingKey, AuditKind::MissingKey, AlertKind::MissingKey)
        } else if result.is_timeout() {
            (OutcomeKind::TimedOut, AuditKind::ExecutionTimeout, AlertKind::ExitTimeout)
        } else {
            (OutcomeKind::Failed, AuditKind::ExecutionFailed, AlertKind::ExitFailed)
        };

        let transition = match kind {
            OutcomeKind::Executed => {
                let signature = result.signature.clone().unwrap_or_default();
                position.mark_executed(signature)
            }
            OutcomeKind::TimedOut => {
                position.exit_signature = result.signature.clone();
                Ok(())
            }
            _ => position.revert_to_active(),
        };
        if let Err(e) = transition {
            tracing::error!("Invalid transition finalizing {}: {}", key, e);
        }
        if disabled_in_flight {
            position.deactivate();
        }

        let persisted = match self.store.upsert_position(&position).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to persist outcome for {}: {}", key, e);
                self.alerts.dispatch(
                    Alert::new(
                        AlertKind::InfrastructureDegraded,
                        trigger.severity,
                        &key.token_mint,
                        format!("Exit outcome ({:?}) not persisted: {}", kind, e),
                    )
                    .with_wallet(&key.wallet)
                    .with_metadata(serde_json::json!({ "signature": result.signature })),
                );
                false
            }
        };
        if kind == OutcomeKind::Executed {
            if !disabled_in_flight {
                self.filter_write().remove(&key.token_mint);
            }
            self.cache.invalidate(&key);
        }

        let detail = result
            .error_message
            .clone()
            .unwrap_or_else(|| format!("exit confirmed ({})", trigger.reason));
        self.audit(
            AuditEvent::new(audit_kind, &key.token_mint, Some(&key.wallet), detail.clone())
                .with_signature(result.signature.clone())
                .with_elapsed(result.elapsed_ms),
        )
        .await;

        let counter = match kind {
            OutcomeKind::Executed => &self.counters.executed,
            OutcomeKind::MissingKey => &self.counters.missing_keys,
            OutcomeKind::TimedOut => &self.counters.timed_out,
            _ => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let message = match kind {
            OutcomeKind::Executed => format!(
                "Exited {} in {}ms{}",
                key.token_mint,
                result.elapsed_ms,
                if position.is_demo { " (demo)" } else { "" }
            ),
            OutcomeKind::MissingKey => "Exit needed but no signing key is available - exit manually".to_string(),
            OutcomeKind::TimedOut => "Exit submitted but not confirmed yet - will reconcile".to_string(),
            _ => format!("Exit failed: {}", detail),
        };
        self.alerts.dispatch(
            Alert::new(alert_kind, trigger.severity, &key.token_mint, message)
                .with_wallet(&key.wallet)
                .with_metadata(serde_json::json!({
                    "signature": result.signature,
                    "elapsed_ms": result.elapsed_ms,
                    "presigned": result.presigned_used,
                    "reason": trigger.reason,
                    "persisted": persisted,
                })),
        );

        tracing::info!(
            position = %key,
            outcome = ?kind,
            elapsed_ms = result.elapsed_ms,
            presigned = result.presigned_used,
            "Exit attempt finished"
        );
        PositionOutcome {
            key,
            kind,
            result: Some(result),
            detail,
        }
    }
}

/// Demo positions never touch the chain
fn simulate_exit() -> ExecutionResult {
    let bytes: Vec<u8> = (0..64).map(|_| rand::random::<u8>()).collect();
    ExecutionResult::success(bs58::encode(bytes).into_string(), Duration::from_millis(1), false)
}
