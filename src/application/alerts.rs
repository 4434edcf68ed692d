//! Alert Dispatcher
//!
//! Fire-and-forget delivery to every configured sink. Each delivery runs
//! in its own task so a slow or failing sink never holds up an exit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinSet;

use crate::ports::alerts::{Alert, AlertSink};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
    tasks: Mutex<JoinSet<()>>,
    counters: Arc<Counters>,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self {
            sinks,
            tasks: Mutex::new(JoinSet::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue delivery and return immediately. Must be called inside a
    /// Tokio runtime.
    pub fn dispatch(&self, alert: Alert) {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            kind = %alert.kind,
            severity = %alert.severity,
            token = %alert.token_mint,
            "{} {}",
            alert.severity.emoji(),
            alert.message
        );

        let mut tasks = self.tasks();
        // Reap finished deliveries so the set stays small
        while tasks.try_join_next().is_some() {}

        for sink in &self.sinks {
            let sink = sink.clone();
            let alert = alert.clone();
            let counters = self.counters.clone();
            tasks.spawn(async move {
                match sink.send_alert(alert).await {
                    Ok(()) => {
                        counters.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!("Alert delivery failed: {}", e);
                    }
                }
            });
        }
    }

    /// Wait for every queued delivery. Used at shutdown and in tests.
    pub async fn drain(&self) {
        let mut pending = std::mem::take(&mut *self.tasks());
        while let Some(joined) = pending.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Alert task aborted: {}", e);
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
