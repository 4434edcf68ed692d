//! Alert sink port

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::Severity;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AlertError {
    #[error("Alert delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("Alert sink not configured")]
    NotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ExitExecuted,
    ExitFailed,
    ExitTimeout,
    MissingKey,
    ManualActionRequired,
    InfrastructureDegraded,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::ExitExecuted => "EXIT EXECUTED",
            AlertKind::ExitFailed => "EXIT FAILED",
            AlertKind::ExitTimeout => "EXIT UNCONFIRMED",
            AlertKind::MissingKey => "MISSING KEY",
            AlertKind::ManualActionRequired => "ACTION REQUIRED",
            AlertKind::InfrastructureDegraded => "INFRASTRUCTURE DEGRADED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: Severity,
    pub wallet: Option<String>,
    pub token_mint: String,
    pub message: String,
    pub metadata: serde_json::Value,
}

impl Alert {
    pub fn new(kind: AlertKind, severity: Severity, token_mint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            wallet: None,
            token_mint: token_mint.into(),
            message: message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_wallet(mut self, wallet: impl Into<String>) -> Self {
        self.wallet = Some(wallet.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, alert: Alert) -> Result<(), AlertError>;
}
