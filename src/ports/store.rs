//! Durable store port
//!
//! Narrow row-level operations over positions, the audit trail, and the
//! velocity sample history.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ProtectedPosition, VelocitySample};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    ProtectionEnabled,
    ProtectionDisabled,
    ProtectionPaused,
    ProtectionResumed,
    SettingsUpdated,
    ExecutionAttempt,
    ExecutionSucceeded,
    ExecutionFailed,
    ExecutionTimeout,
    ManualNotification,
    MissingKey,
    Reconciled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: AuditKind,
    pub token_mint: String,
    pub wallet: Option<String>,
    pub detail: String,
    pub signature: Option<String>,
    #[serde(default)]
    pub elapsed_ms: Option<u64>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, token_mint: impl Into<String>, wallet: Option<&str>, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            token_mint: token_mint.into(),
            wallet: wallet.map(str::to_string),
            detail: detail.into(),
            signature: None,
            elapsed_ms: None,
        }
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_elapsed(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }
}

#[async_trait]
pub trait ProtectionStore: Send + Sync {
    async fn upsert_position(&self, position: &ProtectedPosition) -> Result<(), StoreError>;

    async fn get_position(&self, token_mint: &str, wallet: &str) -> Result<Option<ProtectedPosition>, StoreError>;

    /// Positions on `token_mint` with `is_active` set
    async fn get_active_positions_for_token(&self, token_mint: &str) -> Result<Vec<ProtectedPosition>, StoreError>;

    async fn list_active_positions(&self) -> Result<Vec<ProtectedPosition>, StoreError>;

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError>;

    async fn append_velocity_sample(&self, token_mint: &str, sample: &VelocitySample) -> Result<(), StoreError>;
}
