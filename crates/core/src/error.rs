//! Domain error model.

use thiserror::Error;

/// Result type used across the batch domain.
pub type BatchResult<T> = Result<T, BatchError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures (validation, unknown handlers,
/// conflicts). Storage failures belong to the store error types in infra.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// A value failed validation (e.g. malformed job spec or config value).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. empty or containing whitespace).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A job references an operation nobody registered a handler for.
    #[error("no handler registered for operation '{0}'")]
    UnknownHandler(String),

    /// A conflict occurred (e.g. stale snapshot version).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl BatchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown_handler(operation: impl Into<String>) -> Self {
        Self::UnknownHandler(operation.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
