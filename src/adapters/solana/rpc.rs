use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::rpc_client::{GetConfirmedSignaturesForAddress2Config, RpcClient};
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_client::rpc_request::RpcError;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::Signature,
    transaction::{TransactionError, VersionedTransaction},
};
use solana_transaction_status::{TransactionConfirmationStatus, UiTransactionEncoding};
use std::str::FromStr;
use std::sync::Arc;

use crate::ports::chain::{
    AccountData, BlockhashInfo, ChainError, ChainRpc, ConfirmationStatus, SignatureInfo,
    DEFAULT_MAX_ACCOUNTS_PER_CALL,
};

/// Async `ChainRpc` over the blocking Solana `RpcClient`
///
/// Every call runs inside `spawn_blocking`. Errors are only classified here;
/// retries and the breaker live in the gateway.
#[derive(Clone)]
pub struct SolanaClient {
    client: Arc<RpcClient>,
    skip_preflight: bool,
    max_accounts_per_call: usize,
}

impl SolanaClient {
    pub fn new(rpc_url: String) -> Self {
        let client = Arc::new(RpcClient::new_with_commitment(rpc_url, CommitmentConfig::confirmed()));
        Self {
            client,
            skip_preflight: true,
            max_accounts_per_call: DEFAULT_MAX_ACCOUNTS_PER_CALL,
        }
    }

    pub fn with_skip_preflight(mut self, skip: bool) -> Self {
        self.skip_preflight = skip;
        self
    }

    pub fn with_max_accounts_per_call(mut self, max: usize) -> Self {
        self.max_accounts_per_call = max.max(1);
        self
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ChainError>
    where
        T: Send + 'static,
        F: FnOnce(&RpcClient) -> Result<T, ClientError> + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || f(&client).map_err(classify_client_error))
            .await
            .map_err(|e| ChainError::Transport(format!("Task join error: {}", e)))?
    }
}

fn parse_address(s: &str) -> Result<Pubkey, ChainError> {
    Pubkey::from_str(s).map_err(|e| ChainError::InvalidParams(format!("{}: {}", s, e)))
}

fn parse_signature(s: &str) -> Result<Signature, ChainError> {
    Signature::from_str(s).map_err(|e| ChainError::InvalidParams(format!("{}: {}", s, e)))
}

/// Map provider errors onto the gateway's retry taxonomy
pub(crate) fn classify_client_error(err: ClientError) -> ChainError {
    match err.kind() {
        ClientErrorKind::Io(e) => ChainError::Transport(e.to_string()),
        ClientErrorKind::Reqwest(e) => {
            if e.is_timeout() {
                ChainError::Timeout
            } else if let Some(status) = e.status() {
                classify_status(status.as_u16(), e.to_string())
            } else {
                ChainError::Transport(e.to_string())
            }
        }
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, message, .. }) => {
            classify_rpc_message(*code, message)
        }
        ClientErrorKind::RpcError(RpcError::RpcRequestError(msg)) => classify_text(msg),
        ClientErrorKind::RpcError(other) => ChainError::InvalidParams(other.to_string()),
        ClientErrorKind::TransactionError(TransactionError::BlockhashNotFound) => ChainError::BlockhashExpired,
        ClientErrorKind::TransactionError(e) => ChainError::Rejected(e.to_string()),
        ClientErrorKind::SerdeJson(e) => ChainError::Transport(format!("Malformed response: {}", e)),
        ClientErrorKind::SigningError(e) => ChainError::InvalidParams(e.to_string()),
        ClientErrorKind::Custom(msg) => classify_text(msg),
        _ => ChainError::Transport(err.to_string()),
    }
}

fn classify_status(status: u16, message: String) -> ChainError {
    match status {
        429 => ChainError::RateLimited,
        s => ChainError::ServerError { status: s, message },
    }
}

fn classify_rpc_message(code: i64, message: &str) -> ChainError {
    let lower = message.to_lowercase();
    if lower.contains("blockhash not found") || lower.contains("block height exceeded") {
        return ChainError::BlockhashExpired;
    }
    match code {
        // Node is behind or unhealthy
        -32005 | -32004 | -32016 => ChainError::ServerError {
            status: 503,
            message: message.to_string(),
        },
        -32002 | -32003 => ChainError::Rejected(message.to_string()),
        -32602 | -32600 | -32601 => ChainError::InvalidParams(message.to_string()),
        _ if lower.contains("too many requests") || lower.contains("rate limit") => ChainError::RateLimited,
        _ => ChainError::ServerError {
            status: 500,
            message: message.to_string(),
        },
    }
}

fn classify_text(msg: &str) -> ChainError {
    let lower = msg.to_lowercase();
    if lower.contains("429") || lower.contains("too many requests") {
        ChainError::RateLimited
    } else if lower.contains("timed out") || lower.contains("timeout") {
        ChainError::Timeout
    } else if lower.contains("blockhash not found") {
        ChainError::BlockhashExpired
    } else {
        ChainError::Transport(msg.to_string())
    }
}

#[async_trait]
impl ChainRpc for SolanaClient {
    async fn get_account_info(&self, pubkey: &str) -> Result<Option<AccountData>, ChainError> {
        let key = parse_address(pubkey)?;
        let address = pubkey.to_string();
        self.blocking(move |client| {
            client
                .get_account_with_commitment(&key, client.commitment())
                .map(|response| {
                    response.value.map(|account| AccountData {
                        pubkey: address,
                        lamports: account.lamports,
                        owner: account.owner.to_string(),
                        data: account.data,
                    })
                })
        })
        .await
    }

    async fn get_multiple_accounts(&self, pubkeys: &[String]) -> Result<Vec<Option<AccountData>>, ChainError> {
        let keys = pubkeys.iter().map(|k| parse_address(k)).collect::<Result<Vec<_>, _>>()?;
        let addresses = pubkeys.to_vec();
        self.blocking(move |client| {
            client.get_multiple_accounts(&keys).map(|accounts| {
                accounts
                    .into_iter()
                    .zip(addresses)
                    .map(|(account, address)| {
                        account.map(|a| AccountData {
                            pubkey: address,
                            lamports: a.lamports,
                            owner: a.owner.to_string(),
                            data: a.data,
                        })
                    })
                    .collect()
            })
        })
        .await
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<serde_json::Value>, ChainError> {
        let sig = parse_signature(signature)?;
        let result = self
            .blocking(move |client| client.get_transaction(&sig, UiTransactionEncoding::Json))
            .await;
        match result {
            Ok(tx) => serde_json::to_value(&tx)
                .map(Some)
                .map_err(|e| ChainError::Transport(format!("Failed to encode transaction: {}", e))),
            // Unknown signatures come back as a null result the client cannot decode
            Err(ChainError::Transport(msg)) if msg.contains("invalid type: null") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_signatures_for_address(&self, address: &str, limit: usize) -> Result<Vec<SignatureInfo>, ChainError> {
        let key = parse_address(address)?;
        self.blocking(move |client| {
            let config = GetConfirmedSignaturesForAddress2Config {
                limit: Some(limit),
                commitment: Some(client.commitment()),
                ..Default::default()
            };
            client.get_signatures_for_address_with_config(&key, config).map(|entries| {
                entries
                    .into_iter()
                    .map(|e| SignatureInfo {
                        signature: e.signature,
                        slot: e.slot,
                        err: e.err.map(|err| err.to_string()),
                        block_time: e.block_time,
                    })
                    .collect()
            })
        })
        .await
    }

    async fn get_latest_blockhash(&self) -> Result<BlockhashInfo, ChainError> {
        self.blocking(|client| {
            client
                .get_latest_blockhash_with_commitment(client.commitment())
                .map(|(hash, last_valid_block_height)| BlockhashInfo {
                    blockhash: hash.to_string(),
                    last_valid_block_height,
                })
        })
        .await
    }

    async fn get_block_height(&self) -> Result<u64, ChainError> {
        self.blocking(|client| client.get_block_height()).await
    }

    async fn send_transaction(&self, tx_bytes: &[u8]) -> Result<String, ChainError> {
        let tx: VersionedTransaction = bincode::deserialize(tx_bytes)
            .map_err(|e| ChainError::InvalidParams(format!("Undecodable transaction: {}", e)))?;
        let config = RpcSendTransactionConfig {
            skip_preflight: self.skip_preflight,
            max_retries: Some(0),
            ..Default::default()
        };
        self.blocking(move |client| {
            client
                .send_transaction_with_config(&tx, config)
                .map(|sig| sig.to_string())
        })
        .await
    }

    async fn get_signature_status(&self, signature: &str) -> Result<Option<ConfirmationStatus>, ChainError> {
        let sig = parse_signature(signature)?;
        self.blocking(move |client| {
            client.get_signature_statuses(&[sig]).map(|response| {
                response.value.into_iter().next().flatten().map(|status| {
                    if let Some(err) = status.err {
                        return ConfirmationStatus::Failed(err.to_string());
                    }
                    match status.confirmation_status {
                        Some(TransactionConfirmationStatus::Finalized) => ConfirmationStatus::Finalized,
                        Some(TransactionConfirmationStatus::Confirmed) => ConfirmationStatus::Confirmed,
                        Some(TransactionConfirmationStatus::Processed) => ConfirmationStatus::Processed,
                        // Older nodes only report a confirmation count; none means rooted
                        None if status.confirmations.is_none() => ConfirmationStatus::Finalized,
                        None => ConfirmationStatus::Confirmed,
                    }
                })
            })
        })
        .await
    }

    fn max_accounts_per_call(&self) -> usize {
        self.max_accounts_per_call
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_inputs_fail_before_network() {
        let client = SolanaClient::new("http://127.0.0.1:1".to_string());
        assert!(matches!(
            client.get_account_info("not-a-pubkey").await,
            Err(ChainError::InvalidParams(_))
        ));
        assert!(matches!(
            client.get_signature_status("bad-signature").await,
            Err(ChainError::InvalidParams(_))
        ));
        assert!(matches!(
            client.send_transaction(&[1, 2, 3]).await,
            Err(ChainError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_rpc_message_classification() {
        assert_eq!(
            classify_rpc_message(-32002, "Transaction simulation failed: Blockhash not found"),
            ChainError::BlockhashExpired
        );
        assert!(classify_rpc_message(-32005, "Node is behind by 120 slots").is_retryable());
        assert!(matches!(
            classify_rpc_message(-32602, "Invalid param: WrongSize"),
            ChainError::InvalidParams(_)
        ));
    }

    #[test]
    fn test_text_classification() {
        assert_eq!(classify_text("HTTP status client error (429 Too Many Requests)"), ChainError::RateLimited);
        assert_eq!(classify_text("operation timed out"), ChainError::Timeout);
        assert!(classify_status(502, "bad gateway".into()).is_retryable());
        assert!(!classify_status(404, "not found".into()).is_retryable());
    }

    #[test]
    fn test_max_accounts_floor() {
        let client = SolanaClient::new("http://127.0.0.1:1".to_string()).with_max_accounts_per_call(0);
        assert_eq!(client.max_accounts_per_call(), 1);
    }
}
