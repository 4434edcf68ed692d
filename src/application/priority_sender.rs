//! Priority Sender
//!
//! Submits signed exits and waits for confirmation. Submission is
//! idempotent per signature: a payload that already went out is only
//! re-polled, never resent. Critical exits also go to the bundle relay
//! with the same bytes, so at most one of them can land.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::{ExecutionErrorKind, ExecutionResult, Severity};
use crate::gateway::{GatewayError, RpcGateway};
use crate::ports::chain::{BundleRelay, ChainError, ConfirmationStatus};

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// Mirror critical exits to the bundle relay when one is configured
    pub bundle_on_critical: bool,
    /// How long a submitted signature is remembered. Never shorter than
    /// the confirmation timeout; past the blockhash lifetime a payload
    /// cannot land again.
    pub submitted_retention: Duration,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(400),
            bundle_on_critical: true,
            submitted_retention: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Confirmed { signature: String, elapsed: Duration },
    /// Landed with an error
    Failed {
        signature: String,
        reason: String,
        elapsed: Duration,
    },
    /// Submitted, not confirmed in time. May still land.
    TimedOut { signature: String, elapsed: Duration },
    /// Blockhash too old; rebuild and re-sign
    Expired { elapsed: Duration },
    Rejected { reason: String, elapsed: Duration },
    Transport { reason: String, elapsed: Duration },
}

impl SendOutcome {
    pub fn signature(&self) -> Option<&str> {
        match self {
            SendOutcome::Confirmed { signature, .. }
            | SendOutcome::Failed { signature, .. }
            | SendOutcome::TimedOut { signature, .. } => Some(signature),
            _ => None,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            SendOutcome::Confirmed { elapsed, .. }
            | SendOutcome::Failed { elapsed, .. }
            | SendOutcome::TimedOut { elapsed, .. }
            | SendOutcome::Expired { elapsed }
            | SendOutcome::Rejected { elapsed, .. }
            | SendOutcome::Transport { elapsed, .. } => *elapsed,
        }
    }

    pub fn into_result(self, presigned_used: bool) -> ExecutionResult {
        match self {
            SendOutcome::Confirmed { signature, elapsed } => {
                ExecutionResult::success(signature, elapsed, presigned_used)
            }
            SendOutcome::Failed {
                signature,
                reason,
                elapsed,
            } => ExecutionResult::failure(
                ExecutionErrorKind::Rejected,
                reason,
                Some(signature),
                elapsed,
                presigned_used,
            ),
            SendOutcome::TimedOut { signature, elapsed } => ExecutionResult::failure(
                ExecutionErrorKind::ConfirmationTimeout,
                format!("not confirmed within {:?}", elapsed),
                Some(signature),
                elapsed,
                presigned_used,
            ),
            SendOutcome::Expired { elapsed } => ExecutionResult::failure(
                ExecutionErrorKind::StaleCache,
                "blockhash expired",
                None,
                elapsed,
                presigned_used,
            ),
            SendOutcome::Rejected { reason, elapsed } => {
                ExecutionResult::failure(ExecutionErrorKind::Rejected, reason, None, elapsed, presigned_used)
            }
            SendOutcome::Transport { reason, elapsed } => {
                ExecutionResult::failure(ExecutionErrorKind::Transient, reason, None, elapsed, presigned_used)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderStats {
    pub submitted: u64,
    pub duplicates: u64,
    pub confirmed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub expired: u64,
    pub bundles: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    duplicates: AtomicU64,
    confirmed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    expired: AtomicU64,
    bundles: AtomicU64,
}

pub struct PrioritySender {
    gateway: Arc<RpcGateway>,
    relay: Option<Arc<dyn BundleRelay>>,
    config: SenderConfig,
    /// Signatures already handed to the network
    submitted: DashMap<String, Instant>,
    counters: Counters,
}

impl PrioritySender {
    pub fn new(gateway: Arc<RpcGateway>, relay: Option<Arc<dyn BundleRelay>>, config: SenderConfig) -> Self {
        Self {
            gateway,
            relay,
            config,
            submitted: DashMap::new(),
            counters: Counters::default(),
        }
    }

    pub fn was_submitted(&self, signature: &str) -> bool {
        self.submitted.contains_key(signature)
    }

    /// Signatures currently remembered for idempotency
    pub fn tracked_signatures(&self) -> usize {
        self.submitted.len()
    }

    fn prune_submitted(&self, now: Instant) {
        let retention = self.config.submitted_retention.max(self.config.confirmation_timeout);
        self.submitted
            .retain(|_, submitted_at| now.saturating_duration_since(*submitted_at) < retention);
    }

    /// Submit (once) and wait for confirmation
    pub async fn submit(&self, tx: &VersionedTransaction, severity: Severity) -> SendOutcome {
        let start = Instant::now();
        let signature = match tx.signatures.first() {
            Some(sig) if *sig != Signature::default() => sig.to_string(),
            _ => {
                return SendOutcome::Rejected {
                    reason: "transaction is not signed".to_string(),
                    elapsed: start.elapsed(),
                }
            }
        };

        self.prune_submitted(start);

        // Claim the signature; a second caller only polls
        let first_submission = match self.submitted.entry(signature.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(start);
                true
            }
        };

        if first_submission {
            if let Some(outcome) = self.send_once(tx, &signature, severity, start).await {
                self.submitted.remove(&signature);
                return outcome;
            }
        } else {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::info!("{} already submitted, polling confirmation only", signature);
        }

        self.await_confirmation(signature, start).await
    }

    /// Returns `Some` when the payload definitely did not reach the network
    async fn send_once(
        &self,
        tx: &VersionedTransaction,
        signature: &str,
        severity: Severity,
        start: Instant,
    ) -> Option<SendOutcome> {
        let bytes = match bincode::serialize(tx) {
            Ok(b) => b,
            Err(e) => {
                return Some(SendOutcome::Rejected {
                    reason: format!("serialization failed: {}", e),
                    elapsed: start.elapsed(),
                })
            }
        };

        let relay = self
            .relay
            .as_ref()
            .filter(|_| self.config.bundle_on_critical && severity == Severity::Critical);
        let chain = self.gateway.chain();

        let (rpc, bundle) = tokio::join!(chain.send_transaction(&bytes), async {
            match relay {
                Some(relay) => Some(relay.send_bundle(vec![BASE64.encode(&bytes)]).await),
                None => None,
            }
        });

        let bundled = match bundle {
            Some(Ok(bundle_id)) => {
                self.counters.bundles.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Exit {} mirrored to bundle relay: {}", signature, bundle_id);
                true
            }
            Some(Err(e)) => {
                tracing::warn!("Bundle relay rejected exit {}: {}", signature, e);
                false
            }
            None => false,
        };

        match rpc {
            Ok(_) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Exit {} submitted ({} severity)", signature, severity);
                None
            }
            Err(ChainError::BlockhashExpired) => {
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Exit {} rejected: blockhash expired", signature);
                Some(SendOutcome::Expired {
                    elapsed: start.elapsed(),
                })
            }
            Err(e) if bundled => {
                // The relay holds the same bytes; treat as submitted
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("RPC send failed for {} ({}), bundle accepted", signature, e);
                None
            }
            Err(e @ (ChainError::Rejected(_) | ChainError::InvalidParams(_))) => Some(SendOutcome::Rejected {
                reason: e.to_string(),
                elapsed: start.elapsed(),
            }),
            Err(e) => Some(SendOutcome::Transport {
                reason: e.to_string(),
                elapsed: start.elapsed(),
            }),
        }
    }

    async fn await_confirmation(&self, signature: String, start: Instant) -> SendOutcome {
        let deadline = start + self.config.confirmation_timeout;
        loop {
            match self.gateway.get_signature_status(&signature).await {
                Ok(Some(ConfirmationStatus::Failed(reason))) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    return SendOutcome::Failed {
                        signature,
                        reason,
                        elapsed: start.elapsed(),
                    };
                }
                Ok(Some(status)) if status.is_landed() => {
                    self.counters.confirmed.fetch_add(1, Ordering::Relaxed);
                    let elapsed = start.elapsed();
                    tracing::info!("Exit {} confirmed in {:?}", signature, elapsed);
                    return SendOutcome::Confirmed { signature, elapsed };
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Status poll for {} failed: {}", signature, e),
            }

            if Instant::now() + self.config.poll_interval > deadline {
                self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Exit {} not confirmed within {:?}", signature, self.config.confirmation_timeout);
                return SendOutcome::TimedOut {
                    signature,
                    elapsed: start.elapsed(),
                };
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// One status read for reconciliation
    pub async fn check_status(&self, signature: &str) -> Result<Option<ConfirmationStatus>, GatewayError> {
        self.gateway.get_signature_status(signature).await
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            confirmed: self.counters.confirmed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            bundles: self.counters.bundles.load(Ordering::Relaxed),
        }
    }
}
