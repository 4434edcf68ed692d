//! Threat Classification
//!
//! Categories produced by the pattern matcher, the severity scale shared
//! by the whole pipeline, and the trigger that drives the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a matched threat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    LiquidityRemoval,
    AuthorityChange,
    LargeSwap,
    Freeze,
}

impl ThreatCategory {
    /// Fixed risk score (0-100) per category
    pub fn risk_score(&self) -> u8 {
        match self {
            ThreatCategory::LiquidityRemoval => 95,
            ThreatCategory::Freeze => 90,
            ThreatCategory::AuthorityChange => 85,
            ThreatCategory::LargeSwap => 60,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ThreatCategory::LiquidityRemoval => "Liquidity removed from pool",
            ThreatCategory::AuthorityChange => "Mint/freeze/owner authority changed",
            ThreatCategory::LargeSwap => "Oversized swap against the pool",
            ThreatCategory::Freeze => "Token accounts being frozen",
        }
    }
}

impl fmt::Display for ThreatCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreatCategory::LiquidityRemoval => "liquidity_removal",
            ThreatCategory::AuthorityChange => "authority_change",
            ThreatCategory::LargeSwap => "large_swap",
            ThreatCategory::Freeze => "freeze",
        };
        f.write_str(s)
    }
}

/// Severity scale, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_risk_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => Severity::Critical,
            75..=89 => Severity::High,
            50..=74 => Severity::Medium,
            _ => Severity::Low,
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// One matched message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatEvent {
    pub category: ThreatCategory,
    pub risk_score: u8,
    /// Rule confidence in [0, 1]
    pub confidence: f64,
    pub signature: String,
    pub token_mint: Option<String>,
    pub slot: u64,
    pub matched_rule: String,
}

impl ThreatEvent {
    pub fn severity(&self) -> Severity {
        Severity::from_risk_score(self.risk_score)
    }
}

/// Why the orchestrator was invoked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TriggerReason {
    Threat {
        category: ThreatCategory,
        signature: String,
        confidence: f64,
    },
    Velocity {
        flags: Vec<String>,
        liquidity_change_1m: f64,
        liquidity_change_5m: f64,
    },
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::Threat { category, signature, .. } => {
                write!(f, "{} ({})", category.description(), signature)
            }
            TriggerReason::Velocity { flags, liquidity_change_1m, .. } => {
                write!(f, "velocity alert [{}] liquidity 1m {:.1}%", flags.join(", "), liquidity_change_1m)
            }
            TriggerReason::Manual => f.write_str("manual trigger"),
        }
    }
}

/// Input to the orchestrator's trigger path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionTrigger {
    pub token_mint: String,
    pub severity: Severity,
    /// Slot of the originating transaction for threats, sample timestamp
    /// (ms) for velocity alerts
    pub detected_at: u64,
    pub reason: TriggerReason,
}

impl ProtectionTrigger {
    /// Dedup key: token + detection timestamp
    pub fn event_key(&self) -> String {
        format!("{}:{}", self.token_mint, self.detected_at)
    }

    /// Build a trigger from a matched threat. Events without a token
    /// cannot be routed and yield `None`.
    pub fn from_threat(event: &ThreatEvent) -> Option<Self> {
        let token_mint = event.token_mint.clone()?;
        Some(Self {
            token_mint,
            severity: event.severity(),
            detected_at: event.slot,
            reason: TriggerReason::Threat {
                category: event.category,
                signature: event.signature.clone(),
                confidence: event.confidence,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(category: ThreatCategory, mint: Option<&str>) -> ThreatEvent {
        ThreatEvent {
            category,
            risk_score: category.risk_score(),
            confidence: 0.9,
            signature: "5igSig".to_string(),
            token_mint: mint.map(str::to_string),
            slot: 250_000_000,
            matched_rule: "test".to_string(),
        }
    }

    #[test]
    fn test_severity_from_score() {
        assert_eq!(Severity::from_risk_score(95), Severity::Critical);
        assert_eq!(Severity::from_risk_score(90), Severity::Critical);
        assert_eq!(Severity::from_risk_score(85), Severity::High);
        assert_eq!(Severity::from_risk_score(60), Severity::Medium);
        assert_eq!(Severity::from_risk_score(10), Severity::Low);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn test_category_scores() {
        assert!(ThreatCategory::LiquidityRemoval.risk_score() > ThreatCategory::Freeze.risk_score());
        assert_eq!(event(ThreatCategory::LargeSwap, None).severity(), Severity::Medium);
    }

    #[test]
    fn test_trigger_from_threat() {
        let trigger = ProtectionTrigger::from_threat(&event(ThreatCategory::LiquidityRemoval, Some("MintA"))).unwrap();
        assert_eq!(trigger.severity, Severity::Critical);
        assert_eq!(trigger.event_key(), "MintA:250000000");
    }

    #[test]
    fn test_trigger_requires_token() {
        assert!(ProtectionTrigger::from_threat(&event(ThreatCategory::Freeze, None)).is_none());
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("extreme".parse::<Severity>().is_err());
    }
}
