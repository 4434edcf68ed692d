//! Ports Layer - Trait definitions for external dependencies
//!
//! This module defines the interfaces (ports) that adapters must implement.
//! Following hexagonal architecture, these traits abstract:
//! - Blockchain RPC reads, submission and bundle relays
//! - The trade builder / quote provider (Jupiter)
//! - Key custody
//! - The durable store and alert sink
//! - Market data and the inbound event stream

pub mod alerts;
pub mod chain;
pub mod custody;
pub mod market;
pub mod mocks;
pub mod store;
pub mod stream;
pub mod trade;

pub use alerts::{Alert, AlertError, AlertKind, AlertSink};
pub use chain::{AccountData, BlockhashInfo, BundleRelay, ChainError, ChainRpc, ConfirmationStatus, SignatureInfo};
pub use custody::{CustodyError, KeyCustody};
pub use market::{MarketDataError, MarketDataSource};
pub use store::{AuditEvent, AuditKind, ProtectionStore, StoreError};
pub use stream::{EventStream, StreamError};
pub use trade::{ExitQuote, PriorityFee, TradeBuilder, TradeError, UnsignedExit};
