//! Telegram Bot API alert sink

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::ports::alerts::{Alert, AlertError, AlertSink};

const TELEGRAM_API: &str = "https://api.telegram.org";
/// Telegram rejects longer messages
const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramAlertSink {
    http: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramAlertSink {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Result<Self, AlertError> {
        let bot_token = bot_token.into();
        let chat_id = chat_id.into();
        if bot_token.is_empty() || chat_id.is_empty() {
            return Err(AlertError::NotConfigured);
        }
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AlertError::DeliveryFailed(e.to_string()))?;
        Ok(Self {
            http,
            api_base: TELEGRAM_API.to_string(),
            bot_token,
            chat_id,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

/// Plain-text rendering, one fact per line
pub fn format_alert(alert: &Alert) -> String {
    let mut text = format!("{} {}\n{}\nToken: {}", alert.severity.emoji(), alert.kind, alert.message, alert.token_mint);
    if let Some(wallet) = &alert.wallet {
        text.push_str(&format!("\nWallet: {}", wallet));
    }
    if let Some(signature) = alert.metadata.get("signature").and_then(|s| s.as_str()) {
        text.push_str(&format!("\nTx: https://solscan.io/tx/{}", signature));
    }
    if let Some(reason) = alert.metadata.get("reason").and_then(|s| s.as_str()) {
        text.push_str(&format!("\nReason: {}", reason));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        text = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
        text.push('…');
    }
    text
}

#[async_trait]
impl AlertSink for TelegramAlertSink {
    async fn send_alert(&self, alert: Alert) -> Result<(), AlertError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base.trim_end_matches('/'), self.bot_token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: format_alert(&alert),
            disable_web_page_preview: true,
        };

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            // reqwest errors embed the URL, which carries the bot token
            .map_err(|e| AlertError::DeliveryFailed(e.without_url().to_string()))?;

        let status = response.status();
        let parsed: TelegramResponse = response
            .json()
            .await
            .map_err(|e| AlertError::DeliveryFailed(format!("HTTP {}: {}", status, e.without_url())))?;
        if !parsed.ok {
            return Err(AlertError::DeliveryFailed(
                parsed.description.unwrap_or_else(|| format!("HTTP {}", status)),
            ));
        }
        Ok(())
    }
}
