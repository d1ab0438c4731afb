//! Core error types

use thiserror::Error;

use crate::execution::ExecutionError;

/// Message used when a collaborator answers with an unexpected shape
pub const MALFORMED_RESPONSE_MESSAGE: &str = "Unexpected response from query service";

/// Failure reported by the remote query service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        ServiceError {
            message: message.into(),
        }
    }
}

/// Errors surfaced by the query core entry points
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Remote collaborator failed
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// Collaborator answered with a shape that could not be normalized
    #[error("Unexpected response from query service")]
    MalformedResponse(String),

    /// The execution was cancelled before it resolved
    #[error("Execution {0} was cancelled")]
    Cancelled(String),

    /// Lifecycle misuse (unknown id, double transition)
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The builder has no draft to validate or test
    #[error("No query draft to {0}")]
    NoDraft(&'static str),
}

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;
