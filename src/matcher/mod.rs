//! Threat Pattern Matcher
//!
//! - `message`: inbound payload parsing and queue priorities
//! - `rules`: regex rule set behind the `MessageClassifier` trait
//! - `pool`: supervised worker pool with priority queues
//! - `stats`: latency percentiles and counters

pub mod message;
pub mod pool;
pub mod rules;
pub mod stats;

pub use message::{InboundEvent, LogMessage, MessagePriority};
pub use pool::{PoolConfig, ThreatMatcherPool};
pub use rules::{MessageClassifier, Rule, RuleSet, DEFAULT_LARGE_SWAP_MIN_AMOUNT};
pub use stats::{LatencyWindow, MatcherStats};
