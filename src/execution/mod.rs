//! Query Execution Module
//!
//! Provides the execution-side state of the core:
//! - Result caching with TTL staleness and a global size budget
//! - Lifecycle tracking of every invocation
//! - Cooperative cancellation of in-flight calls

mod cache;
mod cancel;
mod tracker;

pub use cache::{cache_key, CacheEntry, CacheStats, CacheStore};
pub use cancel::{CancelHandle, TimeoutError};
pub use tracker::{Execution, ExecutionId, ExecutionStatus, ExecutionTracker};

/// Execution lifecycle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// No retained execution has this id
    #[error("Unknown execution: {0}")]
    UnknownExecution(String),

    /// The requested transition is not allowed from the current state
    #[error("Execution {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
}

/// Result type for lifecycle operations
pub type ExecutionResult<T> = Result<T, ExecutionError>;
