//! Market Data Adapters
//!
//! - `DexScreenerClient`: per-token price, liquidity and short-window volume
//!   feeding the velocity tracker

mod dexscreener;

pub use dexscreener::{aggregate_pairs, DexPair, DexScreenerClient, DEXSCREENER_API};
