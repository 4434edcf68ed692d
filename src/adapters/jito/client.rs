//! Jito Bundle Client
//!
//! Submits already-signed exits to the block engine as a single-transaction
//! bundle. Used as a best-effort second path next to the RPC send.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::config::{JitoConfig, MAX_BUNDLE_TRANSACTIONS};
use super::error::JitoError;
use super::types::{BundleRequest, JsonRpcResponse};
use crate::ports::chain::{BundleRelay, ChainError};

#[derive(Debug, Clone)]
pub struct JitoBundleClient {
    config: JitoConfig,
    http: Client,
}

impl JitoBundleClient {
    pub fn new() -> Result<Self, JitoError> {
        Self::with_config(JitoConfig::default())
    }

    pub fn with_config(config: JitoConfig) -> Result<Self, JitoError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| JitoError::HttpError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn block_engine_url(&self) -> &str {
        &self.config.block_engine_url
    }

    /// Returns the bundle id
    pub async fn submit_bundle(&self, transactions: Vec<String>) -> Result<String, JitoError> {
        validate_bundle(&transactions)?;

        let mut req = self.http.post(self.config.bundles_url()).json(&BundleRequest::new(transactions));
        if let Some(ref token) = self.config.api_token {
            req = req.header("x-jito-auth", token);
        }
        let response = req.send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(JitoError::RateLimited);
        }

        let body = response.text().await?;
        let rpc: JsonRpcResponse<String> = serde_json::from_str(&body)?;
        if let Some(error) = rpc.error {
            return Err(JitoError::ApiError {
                code: error.code,
                message: error.message,
            });
        }
        rpc.result.ok_or_else(|| JitoError::ApiError {
            code: -1,
            message: "No bundle ID in response".into(),
        })
    }
}

fn validate_bundle(transactions: &[String]) -> Result<(), JitoError> {
    if transactions.is_empty() {
        return Err(JitoError::InvalidBundle("Bundle cannot be empty".into()));
    }
    if transactions.len() > MAX_BUNDLE_TRANSACTIONS {
        return Err(JitoError::InvalidBundle(format!(
            "Bundle cannot contain more than {} transactions",
            MAX_BUNDLE_TRANSACTIONS
        )));
    }
    Ok(())
}

#[async_trait]
impl BundleRelay for JitoBundleClient {
    async fn send_bundle(&self, encoded: Vec<String>) -> Result<String, ChainError> {
        let bundle_id = self.submit_bundle(encoded).await?;
        tracing::debug!("Jito bundle accepted: {}", bundle_id);
        Ok(bundle_id)
    }
}
