//! SPL token account helpers
//!
//! Associated token account derivation and balance decoding for both the
//! SPL Token and Token-2022 programs.

use solana_sdk::pubkey::Pubkey;
use spl_token::solana_program::program_pack::Pack;
use spl_token::state::{Account as TokenAccount, AccountState};
use std::str::FromStr;
use thiserror::Error;

pub const TOKEN_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA");
pub const TOKEN_2022_PROGRAM_ID: Pubkey = solana_sdk::pubkey!("TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb");
pub const ASSOCIATED_TOKEN_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

/// Wrapped SOL, the default exit output
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TokenAccountError {
    #[error("Invalid public key {0}")]
    InvalidPubkey(String),
    #[error("Account data too short: {0} bytes")]
    TooShort(usize),
    #[error("Failed to decode token account: {0}")]
    Decode(String),
}

pub fn parse_pubkey(s: &str) -> Result<Pubkey, TokenAccountError> {
    Pubkey::from_str(s).map_err(|_| TokenAccountError::InvalidPubkey(s.to_string()))
}

/// Associated token account of `wallet` for `mint` under `token_program`
pub fn associated_token_address(wallet: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    let (address, _bump) = Pubkey::find_program_address(
        &[wallet.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ASSOCIATED_TOKEN_PROGRAM_ID,
    );
    address
}

/// Candidate ATAs in lookup order: SPL Token, then Token-2022
pub fn candidate_token_accounts(wallet: &str, mint: &str) -> Result<[Pubkey; 2], TokenAccountError> {
    let wallet = parse_pubkey(wallet)?;
    let mint = parse_pubkey(mint)?;
    Ok([
        associated_token_address(&wallet, &mint, &TOKEN_PROGRAM_ID),
        associated_token_address(&wallet, &mint, &TOKEN_2022_PROGRAM_ID),
    ])
}

/// Raw token amount from account data. Token-2022 accounts carry
/// extensions after the base layout, so only the base is decoded.
pub fn decode_token_amount(data: &[u8]) -> Result<u64, TokenAccountError> {
    if data.len() < TokenAccount::LEN {
        return Err(TokenAccountError::TooShort(data.len()));
    }
    let account = TokenAccount::unpack_from_slice(&data[..TokenAccount::LEN])
        .map_err(|e| TokenAccountError::Decode(e.to_string()))?;
    if account.state == AccountState::Uninitialized {
        return Err(TokenAccountError::Decode("account not initialized".to_string()));
    }
    Ok(account.amount)
}

/// Base-layout token account bytes
pub fn encode_token_account(mint: &Pubkey, owner: &Pubkey, amount: u64) -> Vec<u8> {
    let account = TokenAccount {
        mint: spl_token::solana_program::pubkey::Pubkey::new_from_array(mint.to_bytes()),
        owner: spl_token::solana_program::pubkey::Pubkey::new_from_array(owner.to_bytes()),
        amount,
        state: AccountState::Initialized,
        ..Default::default()
    };
    let mut data = vec![0u8; TokenAccount::LEN];
    account.pack_into_slice(&mut data);
    data
}
