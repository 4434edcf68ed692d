//! Execution outcomes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::threat::Severity;

/// Classification of a failed exit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// Network timeout, rate limit, provider 5xx
    Transient,
    /// Malformed parameters or identifiers
    InvalidInput,
    /// No signing key for the wallet
    CapabilityUnavailable,
    /// Presigned transaction expired and could not be rebuilt
    StaleCache,
    /// Submitted but not confirmed in time; may still land
    ConfirmationTimeout,
    /// Landed on chain with an error, or rejected by the provider
    Rejected,
    /// Nothing to sell or no route
    NoRoute,
    /// Shared infrastructure unavailable (circuit open)
    Unavailable,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionErrorKind::Transient => "transient",
            ExecutionErrorKind::InvalidInput => "invalid_input",
            ExecutionErrorKind::CapabilityUnavailable => "capability_unavailable",
            ExecutionErrorKind::StaleCache => "stale_cache",
            ExecutionErrorKind::ConfirmationTimeout => "confirmation_timeout",
            ExecutionErrorKind::Rejected => "rejected",
            ExecutionErrorKind::NoRoute => "no_route",
            ExecutionErrorKind::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Fee tier of an exit variant, cheapest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Standard,
    Elevated,
    Urgent,
}

impl PriorityTier {
    pub const ALL: [PriorityTier; 3] = [PriorityTier::Standard, PriorityTier::Elevated, PriorityTier::Urgent];

    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Low | Severity::Medium => PriorityTier::Standard,
            Severity::High => PriorityTier::Elevated,
            Severity::Critical => PriorityTier::Urgent,
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PriorityTier::Standard => "standard",
            PriorityTier::Elevated => "elevated",
            PriorityTier::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

/// Outcome of one submission attempt. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub signature: Option<String>,
    pub error: Option<ExecutionErrorKind>,
    pub error_message: Option<String>,
    pub elapsed_ms: u64,
    pub presigned_used: bool,
}

impl ExecutionResult {
    pub fn success(signature: impl Into<String>, elapsed: Duration, presigned_used: bool) -> Self {
        Self {
            success: true,
            signature: Some(signature.into()),
            error: None,
            error_message: None,
            elapsed_ms: elapsed.as_millis() as u64,
            presigned_used,
        }
    }

    pub fn failure(
        kind: ExecutionErrorKind,
        message: impl Into<String>,
        signature: Option<String>,
        elapsed: Duration,
        presigned_used: bool,
    ) -> Self {
        Self {
            success: false,
            signature,
            error: Some(kind),
            error_message: Some(message.into()),
            elapsed_ms: elapsed.as_millis() as u64,
            presigned_used,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.error == Some(ExecutionErrorKind::ConfirmationTimeout)
    }

    pub fn is_missing_key(&self) -> bool {
        self.error == Some(ExecutionErrorKind::CapabilityUnavailable)
    }
}
