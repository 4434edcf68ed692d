//! Jupiter Quote Types
//!
//! Request and response structures for the Jupiter swap API `/quote`
//! endpoint, and the conversion into the port's `ExitQuote`.

use serde::{Deserialize, Serialize};

use crate::ports::trade::{ExitQuote, TradeError};

/// Request parameters for getting a swap quote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub input_mint: String,
    pub output_mint: String,
    /// Amount in base units
    pub amount: u64,
    pub slippage_bps: u16,
    #[serde(default)]
    pub only_direct_routes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restrict_intermediate_tokens: Option<bool>,
}

impl QuoteRequest {
    pub fn new(input_mint: impl Into<String>, output_mint: impl Into<String>, amount: u64, slippage_bps: u16) -> Self {
        Self {
            input_mint: input_mint.into(),
            output_mint: output_mint.into(),
            amount,
            slippage_bps,
            only_direct_routes: false,
            restrict_intermediate_tokens: None,
        }
    }

    pub fn with_restricted_intermediates(mut self, restrict: bool) -> Self {
        self.restrict_intermediate_tokens = Some(restrict);
        self
    }

    /// Query string pairs for the GET request
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("inputMint", self.input_mint.clone()),
            ("outputMint", self.output_mint.clone()),
            ("amount", self.amount.to_string()),
            ("slippageBps", self.slippage_bps.to_string()),
        ];
        if self.only_direct_routes {
            pairs.push(("onlyDirectRoutes", "true".to_string()));
        }
        if let Some(restrict) = self.restrict_intermediate_tokens {
            pairs.push(("restrictIntermediateTokens", restrict.to_string()));
        }
        pairs
    }
}

/// Response from the quote endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    /// Minimum output after slippage
    pub other_amount_threshold: String,
    pub swap_mode: String,
    pub slippage_bps: u16,
    #[serde(default)]
    pub price_impact_pct: String,
    pub route_plan: Vec<RoutePlanStep>,
    #[serde(default)]
    pub context_slot: Option<u64>,
    /// Unknown fields are kept so the quote round-trips into `/swap`
    #[serde(flatten)]
    pub extra: std::collections::HashMap<String, serde_json::Value>,
}

impl QuoteResponse {
    pub fn input_amount(&self) -> u64 {
        self.in_amount.parse().unwrap_or(0)
    }

    pub fn output_amount(&self) -> u64 {
        self.out_amount.parse().unwrap_or(0)
    }

    pub fn price_impact(&self) -> f64 {
        self.price_impact_pct.parse().unwrap_or(0.0)
    }

    /// DEX labels in hop order, e.g. "Raydium -> Orca"
    pub fn route_label(&self) -> String {
        if self.route_plan.is_empty() {
            return "direct".to_string();
        }
        self.route_plan
            .iter()
            .map(|step| step.swap_info.label.as_str())
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn into_exit_quote(self) -> Result<ExitQuote, TradeError> {
        let raw = serde_json::to_value(&self).map_err(|e| TradeError::DecodeError(e.to_string()))?;
        Ok(ExitQuote {
            in_amount: self.input_amount(),
            out_amount: self.output_amount(),
            price_impact_pct: self.price_impact(),
            slippage_bps: self.slippage_bps,
            route: self.route_label(),
            input_mint: self.input_mint,
            output_mint: self.output_mint,
            raw,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanStep {
    pub swap_info: SwapInfo,
    pub percent: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapInfo {
    pub amm_key: String,
    /// DEX label, e.g. "Raydium"
    pub label: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_mint: Option<String>,
}
