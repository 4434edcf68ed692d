//! Jupiter Swap Types
//!
//! `/swap` request and response. The response carries a base64 unsigned
//! `VersionedTransaction` that is decoded here and signed by the cache.

use base64::Engine;
use serde::{Deserialize, Serialize};
use solana_sdk::transaction::VersionedTransaction;

use crate::ports::trade::{PriorityFee, TradeError};

/// `prioritizationFeeLamports` is either a plain lamport amount or a Jito
/// tip object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrioritizationFee {
    Lamports(u64),
    #[serde(rename_all = "camelCase")]
    JitoTip { jito_tip_lamports: u64 },
}

impl From<PriorityFee> for PrioritizationFee {
    fn from(fee: PriorityFee) -> Self {
        if fee.as_jito_tip {
            PrioritizationFee::JitoTip {
                jito_tip_lamports: fee.lamports,
            }
        } else {
            PrioritizationFee::Lamports(fee.lamports)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub user_public_key: String,
    /// The full quote response, passed back untouched
    pub quote_response: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prioritization_fee_lamports: Option<PrioritizationFee>,
    #[serde(default = "default_true")]
    pub dynamic_compute_unit_limit: bool,
    #[serde(default = "default_true")]
    pub wrap_and_unwrap_sol: bool,
}

fn default_true() -> bool {
    true
}

impl SwapRequest {
    pub fn new(user_public_key: impl Into<String>, quote_response: serde_json::Value) -> Self {
        Self {
            user_public_key: user_public_key.into(),
            quote_response,
            prioritization_fee_lamports: None,
            dynamic_compute_unit_limit: true,
            wrap_and_unwrap_sol: true,
        }
    }

    pub fn with_priority_fee(mut self, fee: PriorityFee) -> Self {
        self.prioritization_fee_lamports = Some(fee.into());
        self
    }

    pub fn with_dynamic_compute_limit(mut self, enabled: bool) -> Self {
        self.dynamic_compute_unit_limit = enabled;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    /// Base64 bincode of an unsigned `VersionedTransaction`
    pub swap_transaction: String,
    pub last_valid_block_height: u64,
    #[serde(default)]
    pub prioritization_fee_lamports: u64,
}

impl SwapResponse {
    pub fn transaction_bytes(&self) -> Result<Vec<u8>, TradeError> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.swap_transaction)
            .map_err(|e| TradeError::DecodeError(format!("base64: {}", e)))
    }

    pub fn decode_transaction(&self) -> Result<VersionedTransaction, TradeError> {
        let bytes = self.transaction_bytes()?;
        bincode::deserialize(&bytes).map_err(|e| TradeError::DecodeError(format!("bincode: {}", e)))
    }

    pub fn is_valid_at_height(&self, current_height: u64) -> bool {
        current_height <= self.last_valid_block_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash,
        message::{Message, VersionedMessage},
        pubkey::Pubkey,
        system_instruction,
    };

    #[test]
    fn test_priority_fee_wire_forms() {
        let plain = SwapRequest::new("wallet", serde_json::json!({}))
            .with_priority_fee(PriorityFee::compute_unit(100_000));
        let json = serde_json::to_value(&plain).unwrap();
        assert_eq!(json["prioritizationFeeLamports"], 100_000);
        assert_eq!(json["userPublicKey"], "wallet");

        let tipped = SwapRequest::new("wallet", serde_json::json!({}))
            .with_priority_fee(PriorityFee::jito_tip(1_000_000));
        let json = serde_json::to_value(&tipped).unwrap();
        assert_eq!(json["prioritizationFeeLamports"]["jitoTipLamports"], 1_000_000);
    }

    #[test]
    fn test_fee_omitted_when_unset() {
        let json = serde_json::to_value(SwapRequest::new("w", serde_json::json!({}))).unwrap();
        assert!(json.get("prioritizationFeeLamports").is_none());
        assert_eq!(json["wrapAndUnwrapSol"], true);
    }

    #[test]
    fn test_decode_transaction() {
        let payer = Pubkey::new_unique();
        let ix = system_instruction::transfer(&payer, &Pubkey::new_unique(), 1);
        let message = Message::new_with_blockhash(&[ix], Some(&payer), &Hash::new_unique());
        let tx = VersionedTransaction {
            signatures: vec![Default::default()],
            message: VersionedMessage::Legacy(message),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(bincode::serialize(&tx).unwrap());

        let response = SwapResponse {
            swap_transaction: encoded,
            last_valid_block_height: 500,
            prioritization_fee_lamports: 0,
        };
        let decoded = response.decode_transaction().unwrap();
        assert_eq!(decoded.message.static_account_keys()[0], payer);
        assert!(response.is_valid_at_height(500));
        assert!(!response.is_valid_at_height(501));
    }

    #[test]
    fn test_decode_garbage() {
        let response = SwapResponse {
            swap_transaction: "not base64!".to_string(),
            last_valid_block_height: 0,
            prioritization_fee_lamports: 0,
        };
        assert!(matches!(response.decode_transaction(), Err(TradeError::DecodeError(_))));
    }
}
