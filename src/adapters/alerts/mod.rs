//! Alert Sinks
//!
//! - `TelegramAlertSink`: Bot API `sendMessage`
//! - `LogAlertSink`: structured log line, always available

mod telegram;

use async_trait::async_trait;

use crate::domain::Severity;
use crate::ports::alerts::{Alert, AlertError, AlertSink};

pub use telegram::{format_alert, TelegramAlertSink};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send_alert(&self, alert: Alert) -> Result<(), AlertError> {
        let wallet = alert.wallet.as_deref().unwrap_or("-");
        match alert.severity {
            Severity::Critical | Severity::High => tracing::warn!(
                kind = %alert.kind,
                token = %alert.token_mint,
                wallet,
                metadata = %alert.metadata,
                "ALERT {}",
                alert.message
            ),
            _ => tracing::info!(
                kind = %alert.kind,
                token = %alert.token_mint,
                wallet,
                metadata = %alert.metadata,
                "ALERT {}",
                alert.message
            ),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::alerts::AlertKind;

    #[test]
    fn test_log_sink_never_fails() {
        let sink = LogAlertSink;
        let alert = Alert::new(AlertKind::InfrastructureDegraded, Severity::High, "MintA", "store offline");
        assert!(tokio_test::block_on(sink.send_alert(alert)).is_ok());
    }
}
