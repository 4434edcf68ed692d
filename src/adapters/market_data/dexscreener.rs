//! DexScreener market data
//!
//! API: https://api.dexscreener.com/latest/dex/tokens/{mint}
//! Free, no API key required. Data lags the chain by a few seconds, which is
//! fine for windowed velocity but not for exit pricing.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::domain::VelocitySample;
use crate::ports::market::{MarketDataError, MarketDataSource};

pub const DEXSCREENER_API: &str = "https://api.dexscreener.com/latest/dex";
const SOLANA_CHAIN_ID: &str = "solana";

#[derive(Debug, Deserialize)]
pub struct DexScreenerResponse {
    #[serde(default)]
    pub pairs: Option<Vec<DexPair>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DexPair {
    pub chain_id: String,
    pub dex_id: String,
    pub pair_address: String,
    pub base_token: DexToken,
    pub price_usd: Option<String>,
    pub liquidity: Option<DexLiquidity>,
    pub volume: Option<DexVolume>,
}

impl DexPair {
    fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DexToken {
    pub address: String,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DexLiquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DexVolume {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct DexScreenerClient {
    http: Client,
    base_url: String,
}

impl DexScreenerClient {
    pub fn new() -> Result<Self, MarketDataError> {
        Self::with_base_url(DEXSCREENER_API, Duration::from_secs(10))
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, MarketDataError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketDataError::HttpError(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub async fn get_token_pairs(&self, token_mint: &str) -> Result<Vec<DexPair>, MarketDataError> {
        let url = format!("{}/tokens/{}", self.base_url.trim_end_matches('/'), token_mint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| MarketDataError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MarketDataError::HttpError(format!("DexScreener API error: {}", response.status())));
        }

        let data: DexScreenerResponse = response
            .json()
            .await
            .map_err(|e| MarketDataError::ParseError(e.to_string()))?;
        Ok(data.pairs.unwrap_or_default())
    }
}

/// Collapse every Solana pool where `token_mint` is the base into one sample.
/// Price comes from the deepest pool; liquidity and 5m volume are summed so
/// a pull from any single pool shows up.
pub fn aggregate_pairs(token_mint: &str, pairs: &[DexPair]) -> Result<VelocitySample, MarketDataError> {
    let pools: Vec<&DexPair> = pairs
        .iter()
        .filter(|p| p.chain_id == SOLANA_CHAIN_ID && p.base_token.address == token_mint)
        .collect();

    let deepest = pools
        .iter()
        .max_by(|a, b| {
            a.liquidity_usd()
                .partial_cmp(&b.liquidity_usd())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or_else(|| MarketDataError::NoData(token_mint.to_string()))?;

    let price = deepest
        .price_usd
        .as_deref()
        .ok_or_else(|| MarketDataError::NoData(token_mint.to_string()))?
        .parse::<f64>()
        .map_err(|e| MarketDataError::ParseError(format!("priceUsd: {}", e)))?;

    let liquidity: f64 = pools.iter().map(|p| p.liquidity_usd()).sum();
    let volume: f64 = pools
        .iter()
        .filter_map(|p| p.volume.as_ref().and_then(|v| v.m5))
        .sum();

    let sample = VelocitySample::new(price, liquidity, volume);
    sample
        .validate()
        .map_err(|e| MarketDataError::ParseError(e.to_string()))?;
    Ok(sample)
}

#[async_trait]
impl MarketDataSource for DexScreenerClient {
    async fn sample(&self, token_mint: &str) -> Result<VelocitySample, MarketDataError> {
        let pairs = self.get_token_pairs(token_mint).await?;
        aggregate_pairs(token_mint, &pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pairs() -> Vec<DexPair> {
        let body = r#"{
            "schemaVersion": "1.0.0",
            "pairs": [
                {
                    "chainId": "solana", "dexId": "raydium", "pairAddress": "PoolA",
                    "baseToken": {"address": "MintA", "symbol": "RUG"},
                    "priceUsd": "0.0125",
                    "liquidity": {"usd": 90000.0},
                    "volume": {"m5": 1200.0, "h1": 8000.0, "h24": 90000.0}
                },
                {
                    "chainId": "solana", "dexId": "orca", "pairAddress": "PoolB",
                    "baseToken": {"address": "MintA", "symbol": "RUG"},
                    "priceUsd": "0.0130",
                    "liquidity": {"usd": 10000.0},
                    "volume": {"m5": 300.0}
                },
                {
                    "chainId": "ethereum", "dexId": "uniswap", "pairAddress": "0xpool",
                    "baseToken": {"address": "MintA"},
                    "priceUsd": "9.0",
                    "liquidity": {"usd": 5000000.0}
                }
            ]
        }"#;
        let response: DexScreenerResponse = serde_json::from_str(body).unwrap();
        response.pairs.unwrap()
    }

    #[test]
    fn test_aggregate_uses_deepest_solana_pool() {
        let sample = aggregate_pairs("MintA", &pairs()).unwrap();
        assert_relative_eq!(sample.price, 0.0125);
        assert_relative_eq!(sample.liquidity, 100000.0);
        assert_relative_eq!(sample.volume, 1500.0);
    }

    #[test]
    fn test_unknown_mint_has_no_data() {
        assert!(matches!(aggregate_pairs("MintZ", &pairs()), Err(MarketDataError::NoData(_))));
    }

    #[test]
    fn test_null_pairs() {
        let response: DexScreenerResponse = serde_json::from_str(r#"{"pairs": null}"#).unwrap();
        assert!(response.pairs.is_none());
    }
}
