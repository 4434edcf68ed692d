//! Domain Layer
//!
//! Pure protection logic with no I/O: positions and their lifecycle,
//! threat classification, velocity analytics, the membership filter,
//! the RPC circuit breaker, and trigger deduplication.

pub mod circuit_breaker;
pub mod event_dedup;
pub mod execution;
pub mod membership_filter;
pub mod position;
pub mod threat;
pub mod velocity;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitBreakerStatus, CircuitState};
pub use event_dedup::EventDeduplicator;
pub use execution::{ExecutionErrorKind, ExecutionResult, PriorityTier};
pub use membership_filter::{FilterStats, MembershipFilter};
pub use position::{PositionError, PositionKey, PositionStatus, ProtectedPosition, ProtectionLevel};
pub use threat::{ProtectionTrigger, Severity, ThreatCategory, ThreatEvent, TriggerReason};
pub use velocity::{
    VelocityAlerts, VelocityError, VelocitySample, VelocitySnapshot, VelocityThresholds, VelocityTracker,
    WindowChange,
};
