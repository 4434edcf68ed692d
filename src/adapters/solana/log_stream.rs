//! Websocket log subscriptions feeding the threat matcher
//!
//! One `logsSubscribe` per token with a `mentions` filter. Each notification
//! is forwarded as the raw RPC JSON with a `token_mint` field added.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::rpc_config::{RpcTransactionLogsConfig, RpcTransactionLogsFilter};
use solana_sdk::commitment_config::CommitmentConfig;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::token_account::parse_pubkey;
use crate::ports::stream::{EventStream, StreamError};

struct Subscription {
    cancel: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

pub struct SolanaLogStream {
    ws_url: String,
    client: Mutex<Option<Arc<PubsubClient>>>,
    subscriptions: Arc<DashMap<String, Subscription>>,
}

impl SolanaLogStream {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            client: Mutex::new(None),
            subscriptions: Arc::new(DashMap::new()),
        }
    }

    async fn connection(&self) -> Result<Arc<PubsubClient>, StreamError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = PubsubClient::new(&self.ws_url)
            .await
            .map_err(|e| StreamError::SubscribeFailed(format!("connect {}: {}", self.ws_url, e)))?;
        let client = Arc::new(client);
        *guard = Some(Arc::clone(&client));
        tracing::info!("🔌 Websocket connected: {}", self.ws_url);
        Ok(client)
    }

    /// Drop the shared connection so the next subscribe reconnects
    async fn reset_connection(&self) {
        self.client.lock().await.take();
    }
}

#[async_trait]
impl EventStream for SolanaLogStream {
    async fn subscribe(&self, token_mint: &str, sink: mpsc::Sender<serde_json::Value>) -> Result<(), StreamError> {
        parse_pubkey(token_mint).map_err(|e| StreamError::InvalidAddress(e.to_string()))?;
        if self.subscriptions.contains_key(token_mint) {
            return Ok(());
        }

        let client = self.connection().await?;
        let mint = token_mint.to_string();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), String>>();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let subscriptions = Arc::clone(&self.subscriptions);

        let handle = tokio::spawn(async move {
            let filter = RpcTransactionLogsFilter::Mentions(vec![mint.clone()]);
            let config = RpcTransactionLogsConfig {
                commitment: Some(CommitmentConfig::confirmed()),
            };
            let (mut notifications, unsubscribe) = match client.logs_subscribe(filter, config).await {
                Ok(sub) => sub,
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            let _ = ready_tx.send(Ok(()));

            loop {
                tokio::select! {
                    _ = &mut cancel_rx => break,
                    next = notifications.next() => {
                        let Some(response) = next else {
                            tracing::warn!("Log stream for {} closed by server", mint);
                            subscriptions.remove(&mint);
                            break;
                        };
                        let mut payload = match serde_json::to_value(&response) {
                            Ok(v) => v,
                            Err(e) => {
                                tracing::debug!("Unencodable log notification for {}: {}", mint, e);
                                continue;
                            }
                        };
                        if let Some(obj) = payload.as_object_mut() {
                            obj.insert("token_mint".to_string(), serde_json::Value::String(mint.clone()));
                        }
                        if sink.send(payload).await.is_err() {
                            tracing::debug!("Log sink for {} dropped", mint);
                            subscriptions.remove(&mint);
                            break;
                        }
                    }
                }
            }
            unsubscribe().await;
        });

        match ready_rx.await {
            Ok(Ok(())) => {
                self.subscriptions.insert(
                    token_mint.to_string(),
                    Subscription {
                        cancel: cancel_tx,
                        handle,
                    },
                );
                tracing::debug!("Subscribed to logs mentioning {}", token_mint);
                Ok(())
            }
            Ok(Err(reason)) => {
                self.reset_connection().await;
                Err(StreamError::SubscribeFailed(reason))
            }
            Err(_) => {
                self.reset_connection().await;
                Err(StreamError::SubscribeFailed(format!("subscription task for {} exited", token_mint)))
            }
        }
    }

    async fn unsubscribe(&self, token_mint: &str) {
        if let Some((_, sub)) = self.subscriptions.remove(token_mint) {
            if sub.cancel.send(()).is_err() {
                sub.handle.abort();
            }
            tracing::debug!("Unsubscribed from logs mentioning {}", token_mint);
        }
    }

    fn subscribed(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        tokens.sort();
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_mint_rejected_before_connecting() {
        let stream = SolanaLogStream::new("ws://127.0.0.1:1");
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            stream.subscribe("not-a-mint", tx).await,
            Err(StreamError::InvalidAddress(_))
        ));
        assert!(stream.subscribed().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_fails_subscription() {
        let stream = SolanaLogStream::new("ws://127.0.0.1:1");
        let (tx, _rx) = mpsc::channel(1);
        let result = stream
            .subscribe("So11111111111111111111111111111111111111112", tx)
            .await;
        assert!(matches!(result, Err(StreamError::SubscribeFailed(_))));
        assert!(stream.subscribed().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_noop() {
        let stream = SolanaLogStream::new("ws://127.0.0.1:1");
        stream.unsubscribe("So11111111111111111111111111111111111111112").await;
        assert!(stream.subscribed().is_empty());
    }
}
