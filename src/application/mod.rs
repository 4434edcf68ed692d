//! Application Layer
//!
//! Services that wire domain logic to the ports:
//! - `alerts`: fire-and-forget alert dispatch
//! - `exit_cache`: pre-built, pre-signed exit transactions
//! - `priority_sender`: submission and confirmation of exits
//! - `orchestrator`: position lifecycle and trigger handling
//! - `monitor`: periodic velocity sampling, cache refresh and reconciliation
//! - `ingest`: stream to matcher to orchestrator loop
//! - `context`: construction of the whole service graph

pub mod alerts;
pub mod context;
pub mod exit_cache;
pub mod ingest;
pub mod monitor;
pub mod orchestrator;
pub mod priority_sender;

pub use alerts::{AlertDispatcher, DispatchStats};
pub use context::{production_ports, production_stream, AppContext, ContextError, Ports, RunningServices};
pub use exit_cache::{CacheError, CacheStats, ExitCacheConfig, ExitTransactionCache};
pub use ingest::{IngestConfig, IngestPipeline};
pub use monitor::{MonitorConfig, ProtectionMonitor};
pub use orchestrator::{
    MonitoringStatus, OrchestratorConfig, OrchestratorError, ProtectionOrchestrator, TriggerReport,
};
pub use priority_sender::{PrioritySender, SendOutcome, SenderConfig};
