//! Gateway Layer - disciplined access to remote dependencies
//!
//! Every blockchain read flows through `RpcGateway`; reads that can share a
//! provider call go through `BatchRpcProcessor`. The aggregator is wrapped
//! in `GuardedTradeBuilder` with its own quota.

pub mod backoff;
pub mod batch;
pub mod guard;
pub mod rpc_gateway;
pub mod trade_guard;

pub use backoff::BackoffPolicy;
pub use batch::{BatchConfig, BatchRpcProcessor, BatchStats};
pub use guard::{CallGuard, GuardConfig, GuardError, GuardHealth, Retryable};
pub use rpc_gateway::{GatewayError, RpcGateway};
pub use trade_guard::GuardedTradeBuilder;
