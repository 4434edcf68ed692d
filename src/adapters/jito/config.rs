//! Jito Configuration

use std::time::Duration;

/// Jito Block Engine endpoints
pub mod endpoints {
    pub const MAINNET_AMSTERDAM: &str = "https://amsterdam.mainnet.block-engine.jito.wtf";
    pub const MAINNET_FRANKFURT: &str = "https://frankfurt.mainnet.block-engine.jito.wtf";
    pub const MAINNET_NY: &str = "https://ny.mainnet.block-engine.jito.wtf";
    pub const MAINNET_TOKYO: &str = "https://tokyo.mainnet.block-engine.jito.wtf";
    pub const MAINNET_DEFAULT: &str = MAINNET_NY;
}

/// Block engine limit per bundle
pub const MAX_BUNDLE_TRANSACTIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct JitoConfig {
    pub block_engine_url: String,
    /// The relay is a best-effort side channel; keep this short
    pub timeout: Duration,
    pub api_token: Option<String>,
}

impl Default for JitoConfig {
    fn default() -> Self {
        Self {
            block_engine_url: endpoints::MAINNET_DEFAULT.to_string(),
            timeout: Duration::from_secs(5),
            api_token: None,
        }
    }
}

impl JitoConfig {
    /// Mainnet block engine for a region name; unknown regions use New York
    pub fn mainnet(region: &str) -> Self {
        let url = match region.to_lowercase().as_str() {
            "amsterdam" | "ams" => endpoints::MAINNET_AMSTERDAM,
            "frankfurt" | "fra" => endpoints::MAINNET_FRANKFURT,
            "tokyo" | "tyo" => endpoints::MAINNET_TOKYO,
            _ => endpoints::MAINNET_NY,
        };
        Self {
            block_engine_url: url.to_string(),
            ..Default::default()
        }
    }

    pub fn with_api_token(mut self, token: String) -> Self {
        self.api_token = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn bundles_url(&self) -> String {
        format!("{}/api/v1/bundles", self.block_engine_url.trim_end_matches('/'))
    }
}
