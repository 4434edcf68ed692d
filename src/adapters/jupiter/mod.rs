//! Jupiter Adapter
//!
//! `TradeBuilder` over the Jupiter DEX aggregator: quotes the exit and
//! returns the unsigned swap transaction.

mod client;
mod quote;
mod swap;

pub use client::{JupiterClient, JupiterConfig};
pub use quote::{QuoteRequest, QuoteResponse};
pub use swap::{PrioritizationFee, SwapRequest, SwapResponse};
