use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How a position reacts to a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    /// Exit is executed without asking the owner
    Automatic,
    /// Owner is notified and decides
    Manual,
}

impl std::str::FromStr for ProtectionLevel {
    type Err = PositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "automatic" | "auto" => Ok(ProtectionLevel::Automatic),
            "manual" => Ok(ProtectionLevel::Manual),
            other => Err(PositionError::UnknownLevel(other.to_string())),
        }
    }
}

impl fmt::Display for ProtectionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProtectionLevel::Automatic => "automatic",
            ProtectionLevel::Manual => "manual",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Active,
    Triggered,
    Executed,
    Paused,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionStatus::Active => "active",
            PositionStatus::Triggered => "triggered",
            PositionStatus::Executed => "executed",
            PositionStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PositionError {
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: PositionStatus,
        to: PositionStatus,
    },
    #[error("Unknown protection level: {0}")]
    UnknownLevel(String),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Identity of a protected (token, wallet) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub token_mint: String,
    pub wallet: String,
}

impl PositionKey {
    pub fn new(token_mint: impl Into<String>, wallet: impl Into<String>) -> Self {
        Self {
            token_mint: token_mint.into(),
            wallet: wallet.into(),
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.token_mint, self.wallet)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedPosition {
    pub token_mint: String,
    pub wallet: String,
    pub level: ProtectionLevel,
    pub is_active: bool,
    pub is_demo: bool,
    pub status: PositionStatus,
    pub trigger_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_alerted_at: Option<DateTime<Utc>>,
    /// Exit signature: pending while `Triggered`, final once `Executed`
    #[serde(default)]
    pub exit_signature: Option<String>,
}

impl ProtectedPosition {
    pub fn new(
        token_mint: impl Into<String>,
        wallet: impl Into<String>,
        level: ProtectionLevel,
        is_demo: bool,
    ) -> Result<Self, PositionError> {
        let token_mint = token_mint.into();
        let wallet = wallet.into();
        if token_mint.trim().is_empty() {
            return Err(PositionError::InvalidIdentifier("empty token mint".to_string()));
        }
        if wallet.trim().is_empty() {
            return Err(PositionError::InvalidIdentifier("empty wallet".to_string()));
        }

        Ok(Self {
            token_mint,
            wallet,
            level,
            is_active: true,
            is_demo,
            status: PositionStatus::Active,
            trigger_count: 0,
            created_at: Utc::now(),
            last_checked_at: None,
            last_alerted_at: None,
            exit_signature: None,
        })
    }

    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.token_mint.clone(), self.wallet.clone())
    }

    /// Positions the pipeline still acts on
    pub fn is_monitored(&self) -> bool {
        self.is_active && matches!(self.status, PositionStatus::Active | PositionStatus::Triggered)
    }

    pub fn mark_checked(&mut self, at: DateTime<Utc>) {
        self.last_checked_at = Some(at);
    }

    /// Manual-level trigger: record it without changing status
    pub fn record_alert(&mut self, at: DateTime<Utc>) {
        self.trigger_count = self.trigger_count.saturating_add(1);
        self.last_alerted_at = Some(at);
    }

    /// active -> triggered. A re-trigger of an already triggered position
    /// is accepted and counted.
    pub fn trigger(&mut self, at: DateTime<Utc>) -> Result<(), PositionError> {
        match self.status {
            PositionStatus::Active | PositionStatus::Triggered => {
                self.status = PositionStatus::Triggered;
                self.trigger_count = self.trigger_count.saturating_add(1);
                self.last_checked_at = Some(at);
                Ok(())
            }
            from => Err(PositionError::InvalidTransition {
                from,
                to: PositionStatus::Triggered,
            }),
        }
    }

    /// triggered -> executed (terminal). Monitoring stops.
    pub fn mark_executed(&mut self, signature: impl Into<String>) -> Result<(), PositionError> {
        if self.status != PositionStatus::Triggered {
            return Err(PositionError::InvalidTransition {
                from: self.status,
                to: PositionStatus::Executed,
            });
        }
        self.status = PositionStatus::Executed;
        self.exit_signature = Some(signature.into());
        self.is_active = false;
        Ok(())
    }

    /// triggered -> active after a failed execution
    pub fn revert_to_active(&mut self) -> Result<(), PositionError> {
        if self.status != PositionStatus::Triggered {
            return Err(PositionError::InvalidTransition {
                from: self.status,
                to: PositionStatus::Active,
            });
        }
        self.status = PositionStatus::Active;
        self.exit_signature = None;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), PositionError> {
        if self.status != PositionStatus::Active {
            return Err(PositionError::InvalidTransition {
                from: self.status,
                to: PositionStatus::Paused,
            });
        }
        self.status = PositionStatus::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), PositionError> {
        if self.status != PositionStatus::Paused {
            return Err(PositionError::InvalidTransition {
                from: self.status,
                to: PositionStatus::Active,
            });
        }
        self.status = PositionStatus::Active;
        Ok(())
    }

    /// active -> active settings update
    pub fn update_level(&mut self, level: ProtectionLevel) -> Result<(), PositionError> {
        if !matches!(self.status, PositionStatus::Active | PositionStatus::Paused) {
            return Err(PositionError::InvalidTransition {
                from: self.status,
                to: PositionStatus::Active,
            });
        }
        self.level = level;
        Ok(())
    }

    /// Re-enable a previously disabled position. Executed positions start
    /// over as a fresh protection.
    pub fn reactivate(&mut self, level: ProtectionLevel, is_demo: bool) {
        self.level = level;
        self.is_demo = is_demo;
        self.is_active = true;
        if self.status != PositionStatus::Triggered {
            self.status = PositionStatus::Active;
            self.exit_signature = None;
        }
    }

    /// Soft-delete. A triggered position keeps its status so the in-flight
    /// execution can still resolve.
    pub fn deactivate(&mut self) {
        self.is_active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position() -> ProtectedPosition {
        ProtectedPosition::new("Mint111", "Wallet111", ProtectionLevel::Automatic, false).unwrap()
    }

    #[test]
    fn test_new_position_is_active() {
        let p = position();
        assert!(p.is_active);
        assert_eq!(p.status, PositionStatus::Active);
        assert!(p.is_monitored());
        assert_eq!(p.key().to_string(), "Mint111:Wallet111");
    }

    #[test]
    fn test_rejects_empty_identifiers() {
        assert!(ProtectedPosition::new("", "w", ProtectionLevel::Manual, false).is_err());
        assert!(ProtectedPosition::new("m", " ", ProtectionLevel::Manual, false).is_err());
    }

    #[test]
    fn test_trigger_then_execute() {
        let mut p = position();
        p.trigger(Utc::now()).unwrap();
        assert_eq!(p.status, PositionStatus::Triggered);
        assert_eq!(p.trigger_count, 1);
        p.mark_executed("sig").unwrap();
        assert_eq!(p.status, PositionStatus::Executed);
        assert!(!p.is_active);
        assert!(!p.is_monitored());
        assert_eq!(p.exit_signature.as_deref(), Some("sig"));
    }

    #[test]
    fn test_executed_is_terminal() {
        let mut p = position();
        p.trigger(Utc::now()).unwrap();
        p.mark_executed("sig").unwrap();
        assert!(p.trigger(Utc::now()).is_err());
        assert!(p.revert_to_active().is_err());
        assert!(p.pause().is_err());
    }

    #[test]
    fn test_execute_requires_trigger() {
        let mut p = position();
        assert_eq!(
            p.mark_executed("sig"),
            Err(PositionError::InvalidTransition {
                from: PositionStatus::Active,
                to: PositionStatus::Executed
            })
        );
    }

    #[test]
    fn test_failed_execution_reverts() {
        let mut p = position();
        p.trigger(Utc::now()).unwrap();
        p.revert_to_active().unwrap();
        assert_eq!(p.status, PositionStatus::Active);
        assert!(p.is_active);
    }

    #[test]
    fn test_pause_resume() {
        let mut p = position();
        p.pause().unwrap();
        assert!(!p.is_monitored());
        assert!(p.trigger(Utc::now()).is_err());
        p.resume().unwrap();
        assert_eq!(p.status, PositionStatus::Active);
    }

    #[test]
    fn test_deactivate_in_flight_keeps_status() {
        let mut p = position();
        p.trigger(Utc::now()).unwrap();
        p.deactivate();
        assert_eq!(p.status, PositionStatus::Triggered);
        assert!(!p.is_active);
        // The in-flight execution can still resolve
        p.mark_executed("sig").unwrap();
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("auto".parse::<ProtectionLevel>().unwrap(), ProtectionLevel::Automatic);
        assert_eq!("Manual".parse::<ProtectionLevel>().unwrap(), ProtectionLevel::Manual);
        assert!("yolo".parse::<ProtectionLevel>().is_err());
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&position()).unwrap();
        assert!(json.contains("\"automatic\""));
        assert!(json.contains("\"active\""));
    }
}
