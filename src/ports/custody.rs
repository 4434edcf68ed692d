//! Key custody port
//!
//! Hands out a signing key for a wallet or fails with `Unavailable`.
//! Callers sign and drop the key in the same scope.

use async_trait::async_trait;
use solana_sdk::signature::Keypair;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CustodyError {
    #[error("No signing key available for wallet {0}")]
    Unavailable(String),
    #[error("Keystore entry for {wallet} is corrupted: {reason}")]
    Corrupted { wallet: String, reason: String },
}

#[async_trait]
pub trait KeyCustody: Send + Sync {
    async fn signing_key(&self, wallet: &str) -> Result<Keypair, CustodyError>;

    /// Cheap availability check, no key material leaves custody
    async fn has_key(&self, wallet: &str) -> bool {
        self.signing_key(wallet).await.is_ok()
    }
}
