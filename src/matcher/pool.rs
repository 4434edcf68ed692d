//! Threat Matcher Worker Pool
//!
//! Batches wait in four priority tiers. A fixed set of workers drains them
//! most-urgent first under a per-batch time budget, and a supervisor keeps
//! the worker count constant when a classifier panics.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::{JoinHandle, JoinSet};

use super::message::{InboundEvent, LogMessage, MessagePriority};
use super::rules::MessageClassifier;
use super::stats::{MatcherStats, StatsRecorder};
use crate::domain::threat::ThreatEvent;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Largest slice a worker takes at once
    pub batch_size: usize,
    pub batch_budget: Duration,
    /// Total queued messages before the lowest tier is shed
    pub max_queued: usize,
    pub result_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_size: 10,
            batch_budget: Duration::from_millis(100),
            max_queued: 10_000,
            result_capacity: 1_024,
        }
    }
}

#[derive(Debug, Default)]
struct Queues {
    tiers: [VecDeque<Vec<LogMessage>>; 4],
    queued: usize,
}

impl Queues {
    fn take(&mut self, batch_size: usize) -> Option<Vec<LogMessage>> {
        for tier in self.tiers.iter_mut() {
            if let Some(mut batch) = tier.pop_front() {
                if batch.len() > batch_size {
                    let rest = batch.split_off(batch_size);
                    tier.push_front(rest);
                }
                self.queued -= batch.len();
                return Some(batch);
            }
        }
        None
    }

    /// Drop the oldest batch of the lowest non-empty tier. Returns how
    /// many messages went with it.
    fn shed_one(&mut self) -> usize {
        for tier in self.tiers.iter_mut().rev() {
            if let Some(batch) = tier.pop_front() {
                self.queued -= batch.len();
                return batch.len();
            }
        }
        0
    }
}

struct Shared {
    queues: Mutex<Queues>,
    notify: Notify,
    classifier: Arc<dyn MessageClassifier>,
    results: mpsc::Sender<ThreatEvent>,
    stats: StatsRecorder,
    config: PoolConfig,
    next_id: AtomicU64,
}

impl Shared {
    fn queues(&self) -> MutexGuard<'_, Queues> {
        self.queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn requeue_front(&self, batch: Vec<LogMessage>) {
        let Some(priority) = batch.first().map(|m| m.priority) else {
            return;
        };
        {
            let mut queues = self.queues();
            queues.queued += batch.len();
            queues.tiers[priority.index()].push_front(batch);
        }
        self.notify.notify_one();
    }

    fn process(&self, batch: Vec<LogMessage>) {
        let deadline = Instant::now() + self.config.batch_budget;
        let mut pending = batch.into_iter();

        while let Some(message) = pending.next() {
            if Instant::now() >= deadline {
                let rest: Vec<LogMessage> = std::iter::once(message).chain(pending).collect();
                self.stats.deferred.fetch_add(rest.len() as u64, Ordering::Relaxed);
                tracing::debug!("Batch budget spent, deferring {} messages", rest.len());
                self.requeue_front(rest);
                return;
            }

            self.stats.processed.fetch_add(1, Ordering::Relaxed);
            if let Some(event) = self.classifier.classify(&message.event) {
                self.stats.matched.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    category = %event.category,
                    signature = %event.signature,
                    priority = %message.priority,
                    "Threat matched"
                );
                if self.results.try_send(event).is_err() {
                    self.stats.dropped_results.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Matcher result channel full, threat dropped");
                }
            }
            self.stats.record_latency(message.enqueued_at.elapsed());
        }
    }
}

async fn worker_loop(shared: Arc<Shared>) {
    loop {
        let next = shared.queues().take(shared.config.batch_size.max(1));
        match next {
            Some(batch) => {
                shared.process(batch);
                tokio::task::yield_now().await;
            }
            None => shared.notify.notified().await,
        }
    }
}

async fn supervise(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut workers = JoinSet::new();
    for _ in 0..shared.config.workers.max(1) {
        workers.spawn(worker_loop(shared.clone()));
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(joined) = workers.join_next() => {
                match joined {
                    Err(e) if e.is_panic() => {
                        let restarts = shared.stats.worker_restarts.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::error!("Matcher worker panicked, restarting (restart #{})", restarts);
                    }
                    _ => tracing::warn!("Matcher worker exited, restarting"),
                }
                workers.spawn(worker_loop(shared.clone()));
            }
        }
    }

    workers.abort_all();
    while workers.join_next().await.is_some() {}
    tracing::info!("Matcher pool stopped");
}

pub struct ThreatMatcherPool {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ThreatMatcherPool {
    /// Spawn the workers. Matched threats arrive on the returned receiver.
    pub fn start(classifier: Arc<dyn MessageClassifier>, config: PoolConfig) -> (Self, mpsc::Receiver<ThreatEvent>) {
        let (results, results_rx) = mpsc::channel(config.result_capacity.max(1));
        let (shutdown, shutdown_rx) = watch::channel(false);
        tracing::info!("Starting matcher pool with {} workers", config.workers.max(1));

        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues::default()),
            notify: Notify::new(),
            classifier,
            results,
            stats: StatsRecorder::new(),
            config,
            next_id: AtomicU64::new(0),
        });
        let supervisor = tokio::spawn(supervise(shared.clone(), shutdown_rx));

        (
            Self {
                shared,
                shutdown,
                supervisor: Mutex::new(Some(supervisor)),
            },
            results_rx,
        )
    }

    /// Queue priority for one event given whether its token is protected
    pub fn prioritize(&self, event: &InboundEvent, protected: bool) -> MessagePriority {
        MessagePriority::assign(protected, self.shared.classifier.prefilter(event))
    }

    /// Queue a batch. Never blocks; unclassified events are counted and
    /// dropped here. Returns the number accepted.
    pub fn enqueue(&self, events: Vec<InboundEvent>, priority: MessagePriority) -> usize {
        let now = Instant::now();
        let total = events.len();
        let batch: Vec<LogMessage> = events
            .into_iter()
            .filter(InboundEvent::is_classified)
            .map(|event| LogMessage {
                id: self.shared.next_id.fetch_add(1, Ordering::Relaxed),
                event,
                priority,
                enqueued_at: now,
            })
            .collect();
        let unclassified = total - batch.len();
        if unclassified > 0 {
            self.shared
                .stats
                .unclassified
                .fetch_add(unclassified as u64, Ordering::Relaxed);
        }
        if batch.is_empty() {
            return 0;
        }
        let accepted = batch.len();

        let mut dropped = 0;
        {
            let mut queues = self.shared.queues();
            queues.queued += accepted;
            queues.tiers[priority.index()].push_back(batch);
            while queues.queued > self.shared.config.max_queued {
                let shed = queues.shed_one();
                if shed == 0 {
                    break;
                }
                dropped += shed;
            }
        }
        if dropped > 0 {
            self.shared
                .stats
                .dropped_messages
                .fetch_add(dropped as u64, Ordering::Relaxed);
            tracing::warn!("Matcher queue over capacity, shed {} low-priority messages", dropped);
        }

        self.shared.notify.notify_one();
        accepted
    }

    pub fn queued(&self) -> usize {
        self.shared.queues().queued
    }

    pub fn stats(&self) -> MatcherStats {
        self.shared.stats.snapshot(self.queued())
    }

    /// Stop the supervisor and its workers. Queued work is discarded.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let handle = self
            .supervisor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
