//! Jupiter API Client
//!
//! HTTP client for the Jupiter swap API, implementing `TradeBuilder`.
//! Each call is a single attempt: retries, quota and circuit breaking
//! belong to `GuardedTradeBuilder`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

use super::quote::{QuoteRequest, QuoteResponse};
use super::swap::{SwapRequest, SwapResponse};
use crate::ports::trade::{ExitQuote, PriorityFee, TradeBuilder, TradeError, UnsignedExit};

#[derive(Debug, Clone)]
pub struct JupiterConfig {
    pub api_base_url: String,
    /// Optional API key for higher rate limits
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub restrict_intermediate_tokens: bool,
    pub dynamic_compute_units: bool,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.jup.ag/swap/v1".to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
            restrict_intermediate_tokens: true,
            dynamic_compute_units: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JupiterClient {
    config: JupiterConfig,
    http: Client,
}

impl JupiterClient {
    pub fn new() -> Result<Self, TradeError> {
        Self::with_config(JupiterConfig::default())
    }

    pub fn with_config(config: JupiterConfig) -> Result<Self, TradeError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TradeError::ApiError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn api_base_url(&self) -> &str {
        &self.config.api_base_url
    }

    pub async fn get_quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, TradeError> {
        let url = format!("{}/quote", self.config.api_base_url);
        let mut req = self.http.get(&url).query(&request.query_pairs());
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("x-api-key", api_key);
        }
        let response = req.send().await.map_err(map_transport)?;
        handle_response(response).await
    }

    pub async fn get_swap_transaction(&self, request: &SwapRequest) -> Result<SwapResponse, TradeError> {
        let url = format!("{}/swap", self.config.api_base_url);
        let mut req = self.http.post(&url).json(request);
        if let Some(ref api_key) = self.config.api_key {
            req = req.header("x-api-key", api_key);
        }
        let response = req.send().await.map_err(map_transport)?;
        handle_response(response).await
    }
}

fn map_transport(e: reqwest::Error) -> TradeError {
    if e.is_timeout() {
        TradeError::Timeout
    } else {
        TradeError::ApiError(e.to_string())
    }
}

/// Status and body text to a classified error
pub(crate) fn classify_error(status: StatusCode, body: &str) -> TradeError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return TradeError::RateLimited;
    }
    if status.is_server_error() {
        return TradeError::ApiError(format!("Server error {}: {}", status, body));
    }
    if body.contains("SlippageToleranceExceeded") || body.contains("6001") {
        return TradeError::SlippageExceeded;
    }
    if body.contains("COULD_NOT_FIND_ANY_ROUTE") || body.contains("NO_ROUTES_FOUND") || body.contains("No routes") {
        return TradeError::NoRoute(body.to_string());
    }
    TradeError::InvalidParameters(format!("API error {}: {}", status, body))
}

async fn handle_response<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, TradeError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_error(status, &body));
    }
    response
        .json()
        .await
        .map_err(|e| TradeError::DecodeError(format!("Failed to parse response: {}", e)))
}

#[async_trait]
impl TradeBuilder for JupiterClient {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u16,
    ) -> Result<ExitQuote, TradeError> {
        if amount == 0 {
            return Err(TradeError::InvalidParameters("amount must be > 0".to_string()));
        }
        let request = QuoteRequest::new(input_mint, output_mint, amount, max_slippage_bps)
            .with_restricted_intermediates(self.config.restrict_intermediate_tokens);
        let quote = self.get_quote(&request).await?;
        if quote.output_amount() == 0 {
            return Err(TradeError::NoRoute(format!("zero output for {}", input_mint)));
        }
        quote.into_exit_quote()
    }

    async fn build_transaction(
        &self,
        quote: &ExitQuote,
        wallet: &str,
        priority_fee: PriorityFee,
    ) -> Result<UnsignedExit, TradeError> {
        let request = SwapRequest::new(wallet, quote.raw.clone())
            .with_priority_fee(priority_fee)
            .with_dynamic_compute_limit(self.config.dynamic_compute_units);
        let swap = self.get_swap_transaction(&request).await?;
        let transaction = swap.decode_transaction()?;
        tracing::debug!(
            "Built Jupiter exit for {} ({} bps, fee {} lamports, valid until {})",
            wallet,
            quote.slippage_bps,
            priority_fee.lamports,
            swap.last_valid_block_height
        );
        Ok(UnsignedExit {
            transaction,
            last_valid_block_height: swap.last_valid_block_height,
            priority_fee,
        })
    }
}
