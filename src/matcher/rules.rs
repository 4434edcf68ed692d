//! Threat rules
//!
//! Ordered regex rules per category. The classifier reports the
//! highest-risk match for a message, ties broken by rule confidence.

use regex::Regex;

use super::message::InboundEvent;
use crate::domain::threat::{ThreatCategory, ThreatEvent};

/// Default floor for the oversized swap rule (raw token units)
pub const DEFAULT_LARGE_SWAP_MIN_AMOUNT: u64 = 1_000_000_000_000;

/// Classification seam; the pool only sees this trait
pub trait MessageClassifier: Send + Sync {
    fn classify(&self, event: &InboundEvent) -> Option<ThreatEvent>;

    /// Cheap keyword check used for queue priority
    fn prefilter(&self, event: &InboundEvent) -> bool;
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    pub category: ThreatCategory,
    pub pattern: Regex,
    pub confidence: f64,
    /// First capture group is an amount that must reach the swap floor
    pub captures_amount: bool,
}

impl Rule {
    fn new(
        name: &'static str,
        category: ThreatCategory,
        pattern: &str,
        confidence: f64,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name,
            category,
            pattern: Regex::new(pattern)?,
            confidence,
            captures_amount: false,
        })
    }

    fn with_amount(mut self) -> Self {
        self.captures_amount = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<Rule>,
    keywords: Regex,
    large_swap_min_amount: u64,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>, keywords: Regex, large_swap_min_amount: u64) -> Self {
        Self {
            rules,
            keywords,
            large_swap_min_amount,
        }
    }

    /// Built-in rules for AMM and SPL Token activity
    pub fn default_rules(large_swap_min_amount: u64) -> Result<Self, regex::Error> {
        let rules = vec![
            Rule::new(
                "remove_liquidity_ix",
                ThreatCategory::LiquidityRemoval,
                r"(?i)instruction:\s*(remove_?liquidity|withdraw_?all|withdraw_?liquidity)",
                0.95,
            )?,
            Rule::new(
                "pool_drain",
                ThreatCategory::LiquidityRemoval,
                r"(?i)\b(burn_?lp|close_?pool|remove_?liquidity)\b",
                0.8,
            )?,
            Rule::new(
                "freeze_ix",
                ThreatCategory::Freeze,
                r"(?i)instruction:\s*freeze_?account",
                0.95,
            )?,
            Rule::new("freeze_mention", ThreatCategory::Freeze, r"(?i)\bfreeze_?account\b", 0.75)?,
            Rule::new(
                "set_authority_ix",
                ThreatCategory::AuthorityChange,
                r"(?i)instruction:\s*set_?authority",
                0.9,
            )?,
            Rule::new(
                "ownership_transfer",
                ThreatCategory::AuthorityChange,
                r"(?i)\b(transfer_?ownership|update_?mint_?authority|set_?authority)\b",
                0.75,
            )?,
            Rule::new(
                "oversized_swap",
                ThreatCategory::LargeSwap,
                r"(?i)instruction:\s*swap\b.*?amount_?in[=:\s]+(\d+)",
                0.7,
            )?
            .with_amount(),
        ];
        let keywords = Regex::new(r"(?i)(liquidity|withdraw|freeze|authority|ownership|burn|close_?pool)")?;
        Ok(Self::new(rules, keywords, large_swap_min_amount))
    }

    pub fn large_swap_min_amount(&self) -> u64 {
        self.large_swap_min_amount
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn rule_matches(&self, rule: &Rule, text: &str) -> bool {
        if !rule.captures_amount {
            return rule.pattern.is_match(text);
        }
        rule.pattern.captures_iter(text).any(|caps| {
            caps.get(1)
                .and_then(|m| m.as_str().parse::<u64>().ok())
                .map(|amount| amount >= self.large_swap_min_amount)
                .unwrap_or(false)
        })
    }
}

impl MessageClassifier for RuleSet {
    fn classify(&self, event: &InboundEvent) -> Option<ThreatEvent> {
        let signature = event.signature()?;
        let text = event.text();

        let best = self
            .rules
            .iter()
            .filter(|rule| self.rule_matches(rule, &text))
            .max_by(|a, b| {
                a.category
                    .risk_score()
                    .cmp(&b.category.risk_score())
                    .then(a.confidence.total_cmp(&b.confidence))
            })?;

        Some(ThreatEvent {
            category: best.category,
            risk_score: best.category.risk_score(),
            confidence: best.confidence,
            signature: signature.to_string(),
            token_mint: event.token_mint().map(str::to_string),
            slot: event.slot(),
            matched_rule: best.name.to_string(),
        })
    }

    fn prefilter(&self, event: &InboundEvent) -> bool {
        event.is_classified() && self.keywords.is_match(&event.text())
    }
}
