//! Jito Bundle Adapter
//!
//! MEV-protected submission of signed exits via the Jito Block Engine.

mod client;
mod config;
mod error;
mod types;

pub use client::JitoBundleClient;
pub use config::{endpoints, JitoConfig, MAX_BUNDLE_TRANSACTIONS};
pub use error::JitoError;
pub use types::BundleRequest;
