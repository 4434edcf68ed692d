//! Call Guard
//!
//! Quota, concurrency, circuit breaker and retry discipline for calls to a
//! remote dependency. One guard per dependency; the RPC gateway and the
//! trade builder each own one.

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};

use super::backoff::BackoffPolicy;
use crate::domain::circuit_breaker::{
    CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus, CircuitState, DEFAULT_COOLDOWN,
    DEFAULT_FAILURE_THRESHOLD,
};
use crate::ports::{ChainError, TradeError};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Errors that know whether a retry can help
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ChainError {
    fn is_retryable(&self) -> bool {
        ChainError::is_retryable(self)
    }
}

impl Retryable for TradeError {
    fn is_retryable(&self) -> bool {
        TradeError::is_retryable(self)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GuardError<E> {
    /// Non-retryable error from the dependency, returned as-is
    #[error("Request rejected")]
    Rejected(E),

    #[error("Circuit open - retry in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },

    #[error("{operation} unavailable after {attempts} attempts: {reason}")]
    Unavailable {
        operation: String,
        attempts: u32,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub requests_per_minute: u32,
    pub burst: u32,
    pub max_concurrency: usize,
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Per-attempt timeout
    pub call_timeout: Duration,
    /// Longest a caller waits for a quota token or a permit
    pub max_queue_wait: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
            burst: 20,
            max_concurrency: 16,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            call_timeout: Duration::from_secs(5),
            max_queue_wait: Duration::from_secs(2),
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Default)]
struct GuardMetrics {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    retries: AtomicU64,
    rejected_fast: AtomicU64,
    non_retryable: AtomicU64,
    quota_timeouts: AtomicU64,
}

/// Health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardHealth {
    pub name: String,
    pub breaker: CircuitBreakerStatus,
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub retries: u64,
    pub rejected_fast: u64,
    pub non_retryable: u64,
    pub quota_timeouts: u64,
    pub available_permits: usize,
}

impl GuardHealth {
    pub fn is_degraded(&self) -> bool {
        !self.breaker.state.allows_calls() || self.breaker.consecutive_failures > 0
    }
}

/// Half-open trial slot held by one call. Dropped without a verdict
/// (cancelled or panicked caller) it frees the slot for the next trial.
struct TrialSlot<'a> {
    breaker: &'a Mutex<CircuitBreaker>,
    claimed: bool,
}

impl TrialSlot<'_> {
    fn settle(&mut self) {
        self.claimed = false;
    }
}

impl Drop for TrialSlot<'_> {
    fn drop(&mut self) {
        if self.claimed {
            self.breaker
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .release_trial();
            tracing::debug!("Half-open trial abandoned, slot released");
        }
    }
}

pub struct CallGuard {
    name: String,
    limiter: DirectLimiter,
    permits: Semaphore,
    breaker: Mutex<CircuitBreaker>,
    config: GuardConfig,
    metrics: GuardMetrics,
}

impl CallGuard {
    pub fn new(name: impl Into<String>, config: GuardConfig) -> Self {
        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_minute(rpm).allow_burst(burst);

        Self {
            name: name.into(),
            limiter: RateLimiter::direct(quota),
            permits: Semaphore::new(config.max_concurrency.max(1)),
            breaker: Mutex::new(CircuitBreaker::with_config(config.failure_threshold, config.cooldown)),
            config,
            metrics: GuardMetrics::default(),
        }
    }

    fn breaker(&self) -> MutexGuard<'_, CircuitBreaker> {
        self.breaker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `op` under quota, concurrency, breaker and retry discipline.
    /// `op` is invoked once per attempt.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, op: F) -> Result<T, GuardError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let max_attempts = self.config.backoff.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            // Fail fast while open, before spending quota
            if let Err(e) = self.breaker().check(Instant::now()) {
                self.metrics.rejected_fast.fetch_add(1, Ordering::Relaxed);
                return Err(open_error(e));
            }

            if timeout(self.config.max_queue_wait, self.limiter.until_ready())
                .await
                .is_err()
            {
                self.metrics.quota_timeouts.fetch_add(1, Ordering::Relaxed);
                return Err(GuardError::Unavailable {
                    operation: operation.to_string(),
                    attempts: attempt,
                    reason: format!("{} quota wait exceeded {:?}", self.name, self.config.max_queue_wait),
                });
            }

            let permit = match timeout(self.config.max_queue_wait, self.permits.acquire()).await {
                Ok(Ok(permit)) => permit,
                _ => {
                    self.metrics.quota_timeouts.fetch_add(1, Ordering::Relaxed);
                    return Err(GuardError::Unavailable {
                        operation: operation.to_string(),
                        attempts: attempt,
                        reason: format!("{} concurrency limit saturated", self.name),
                    });
                }
            };

            // Admission; may claim the half-open trial
            let in_trial = {
                let mut breaker = self.breaker();
                match breaker.try_acquire(Instant::now()) {
                    Ok(()) => breaker.state() == CircuitState::HalfOpen,
                    Err(e) => {
                        self.metrics.rejected_fast.fetch_add(1, Ordering::Relaxed);
                        return Err(open_error(e));
                    }
                }
            };
            let mut trial = TrialSlot {
                breaker: &self.breaker,
                claimed: in_trial,
            };

            self.metrics.calls.fetch_add(1, Ordering::Relaxed);
            let outcome = timeout(self.config.call_timeout, op()).await;
            drop(permit);
            // Every branch below records a verdict
            trial.settle();

            match outcome {
                Ok(Ok(value)) => {
                    self.breaker().record_success();
                    self.metrics.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Ok(Err(e)) if !e.is_retryable() => {
                    // The provider answered; it is healthy even if the request was bad
                    self.breaker().record_success();
                    self.metrics.non_retryable.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("{} {} rejected (not retried): {}", self.name, operation, e);
                    return Err(GuardError::Rejected(e));
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.config.call_timeout);
                }
            }

            self.metrics.failures.fetch_add(1, Ordering::Relaxed);
            self.breaker().record_failure(Instant::now());

            if attempt + 1 < max_attempts {
                let delay = self.config.backoff.delay_for(attempt);
                self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "{} {} failed (attempt {}/{}): {} - retrying in {:?}",
                    self.name,
                    operation,
                    attempt + 1,
                    max_attempts,
                    last_error,
                    delay
                );
                sleep(delay).await;
            }
        }

        tracing::error!("{} {} unavailable after {} attempts: {}", self.name, operation, max_attempts, last_error);
        Err(GuardError::Unavailable {
            operation: operation.to_string(),
            attempts: max_attempts,
            reason: last_error,
        })
    }

    pub fn health(&self) -> GuardHealth {
        GuardHealth {
            name: self.name.clone(),
            breaker: self.breaker().status(Instant::now()),
            calls: self.metrics.calls.load(Ordering::Relaxed),
            successes: self.metrics.successes.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
            retries: self.metrics.retries.load(Ordering::Relaxed),
            rejected_fast: self.metrics.rejected_fast.load(Ordering::Relaxed),
            non_retryable: self.metrics.non_retryable.load(Ordering::Relaxed),
            quota_timeouts: self.metrics.quota_timeouts.load(Ordering::Relaxed),
            available_permits: self.permits.available_permits(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn open_error<E>(e: CircuitBreakerError) -> GuardError<E> {
    match e {
        CircuitBreakerError::Open { retry_in_ms } => GuardError::CircuitOpen { retry_in_ms },
        CircuitBreakerError::TrialInFlight => GuardError::CircuitOpen { retry_in_ms: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast_config() -> GuardConfig {
        GuardConfig {
            requests_per_minute: 60_000,
            burst: 1_000,
            max_concurrency: 4,
            failure_threshold: 3,
            cooldown: Duration::from_millis(100),
            call_timeout: Duration::from_millis(200),
            max_queue_wait: Duration::from_millis(500),
            backoff: BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(5), 3),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let guard = CallGuard::new("test", fast_config());
        let attempts = AtomicU32::new(0);
        let result: Result<u32, GuardError<ChainError>> = guard
            .run("op", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ChainError::Timeout)
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(guard.health().retries, 2);
        // Success resets the breaker's failure run
        assert_eq!(guard.health().breaker.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_non_retryable_aborts_immediately() {
        let guard = CallGuard::new("test", fast_config());
        let attempts = AtomicU32::new(0);
        let result: Result<u32, _> = guard
            .run("op", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ChainError::InvalidParams("bad".into()))
            })
            .await;
        assert_eq!(result, Err(GuardError::Rejected(ChainError::InvalidParams("bad".into()))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(guard.health().breaker.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_exhaustion_surfaces_unavailable() {
        let guard = CallGuard::new("test", fast_config());
        let result: Result<u32, _> = guard.run("op", || async { Err(ChainError::RateLimited) }).await;
        match result {
            Err(GuardError::Unavailable { attempts, reason, .. }) => {
                assert_eq!(attempts, 3);
                assert!(reason.contains("Rate limited"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let guard = CallGuard::new("test", fast_config());
        let result: Result<u32, GuardError<ChainError>> = guard
            .run("op", || async {
                sleep(Duration::from_secs(5)).await;
                Ok(1)
            })
            .await;
        assert!(matches!(result, Err(GuardError::Unavailable { .. })));
        assert_eq!(guard.health().failures, 3);
        assert_eq!(guard.health().breaker.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_then_trial_closes() {
        let guard = CallGuard::new("test", fast_config());
        let _ = guard
            .run::<u32, _, _, _>("op", || async { Err(ChainError::Timeout) })
            .await;
        assert_eq!(guard.health().breaker.state, CircuitState::Open);

        let attempts = AtomicU32::new(0);
        let result = guard
            .run("op", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, ChainError>(1)
            })
            .await;
        assert!(matches!(result, Err(GuardError::CircuitOpen { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        sleep(Duration::from_millis(120)).await;
        let result = guard.run("op", || async { Ok::<u32, ChainError>(2) }).await;
        assert_eq!(result, Ok(2));
        assert_eq!(guard.health().breaker.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_cancelled_trial_releases_slot() {
        let guard = CallGuard::new("test", fast_config());
        let _ = guard
            .run::<u32, _, _, _>("op", || async { Err(ChainError::Timeout) })
            .await;
        assert_eq!(guard.health().breaker.state, CircuitState::Open);
        sleep(Duration::from_millis(120)).await;

        // The trial call is dropped by its caller before the provider answers
        let abandoned = timeout(
            Duration::from_millis(20),
            guard.run("op", || async {
                sleep(Duration::from_secs(5)).await;
                Ok::<u32, ChainError>(1)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(guard.health().breaker.state, CircuitState::HalfOpen);

        let result = guard.run("op", || async { Ok::<u32, ChainError>(2) }).await;
        assert_eq!(result, Ok(2));
        assert_eq!(guard.health().breaker.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_quota_wait_bounded() {
        let mut config = fast_config();
        config.requests_per_minute = 1;
        config.burst = 1;
        config.max_queue_wait = Duration::from_millis(20);
        let guard = CallGuard::new("test", config);

        let first = guard.run("op", || async { Ok::<u32, ChainError>(1) }).await;
        assert_eq!(first, Ok(1));
        let second = guard.run("op", || async { Ok::<u32, ChainError>(2) }).await;
        assert!(matches!(second, Err(GuardError::Unavailable { .. })));
        assert_eq!(guard.health().quota_timeouts, 1);
    }
}
