//! Circuit Breaker
//!
//! Guards the RPC provider. Opens after a run of consecutive transient
//! failures, rejects calls without touching the network while open, and
//! half-opens after a cooldown to admit a single trial.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default consecutive failures before the breaker opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default cooldown before a half-open trial is allowed
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("Circuit open - retry in {retry_in_ms}ms")]
    Open { retry_in_ms: u64 },

    #[error("Circuit half-open - trial already in flight")]
    TrialInFlight,
}

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the cooldown elapses
    Open,
    /// One trial call is allowed through
    HalfOpen,
}

impl CircuitState {
    /// Returns true if calls may reach the provider
    pub fn allows_calls(&self) -> bool {
        !matches!(self, CircuitState::Open)
    }

    /// Returns a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            CircuitState::Closed => "Closed - provider healthy",
            CircuitState::Open => "OPEN - provider failing, calls rejected",
            CircuitState::HalfOpen => "Half-open - testing provider",
        }
    }
}

/// Point-in-time breaker status for health reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    pub total_trips: u64,
    /// Milliseconds until a trial is admitted, if open
    pub cooldown_remaining_ms: Option<u64>,
}

/// Consecutive-failure circuit breaker.
///
/// Time is passed in explicitly so transitions are deterministic under test.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,

    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    total_trips: u64,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_config(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a breaker with custom threshold and cooldown
    pub fn with_config(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            total_trips: 0,
        }
    }

    /// Non-consuming check: would a call be admitted at `now`?
    pub fn check(&self, now: Instant) -> Result<(), CircuitBreakerError> {
        match self.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen if self.trial_in_flight => Err(CircuitBreakerError::TrialInFlight),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => match self.cooldown_remaining(now) {
                Some(remaining) if !remaining.is_zero() => Err(CircuitBreakerError::Open {
                    retry_in_ms: remaining.as_millis() as u64,
                }),
                _ => Ok(()),
            },
        }
    }

    /// Admit a call. An open breaker whose cooldown has elapsed moves to
    /// half-open and this call becomes the single trial.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), CircuitBreakerError> {
        self.check(now)?;

        match self.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                self.state = CircuitState::HalfOpen;
                self.trial_in_flight = true;
                tracing::info!("Circuit breaker half-open, admitting trial");
            }
            CircuitState::HalfOpen => {
                self.trial_in_flight = true;
            }
        }
        Ok(())
    }

    /// Record a successful call
    pub fn record_success(&mut self) {
        if self.state == CircuitState::HalfOpen {
            tracing::info!("Circuit breaker closed after successful trial");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }

    /// Record a transient failure
    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        match self.state {
            CircuitState::HalfOpen => {
                tracing::warn!("Circuit breaker trial failed, re-opening");
                self.trip(now);
            }
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                self.trip(now);
            }
            _ => {}
        }
    }

    /// Release a half-open trial slot without a verdict (e.g. the call was
    /// abandoned before reaching the provider)
    pub fn release_trial(&mut self) {
        self.trial_in_flight = false;
    }

    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
        self.total_trips += 1;
        tracing::error!(
            "Circuit breaker OPEN after {} consecutive failures (cooldown {:?})",
            self.consecutive_failures,
            self.cooldown
        );
    }

    fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.opened_at
            .map(|at| (at + self.cooldown).saturating_duration_since(now))
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn status(&self, now: Instant) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            failure_threshold: self.failure_threshold,
            total_trips: self.total_trips,
            cooldown_remaining_ms: match self.state {
                CircuitState::Open => self.cooldown_remaining(now).map(|d| d.as_millis() as u64),
                _ => None,
            },
        }
    }
}
