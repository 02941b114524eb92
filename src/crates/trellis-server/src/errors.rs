//! Core error type for the control plane
//!
//! One enum covers the error kinds every subsystem speaks: store lookups,
//! boundary validation, stream-bus timeouts/cancellation, and the
//! transient/fatal split the executor uses for retry decisions.

use thiserror::Error;

/// Result type for control-plane operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors that can occur in the control plane
#[derive(Error, Debug)]
pub enum ServerError {
    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request is semantically invalid
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Request failed field validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A dequeue or wait operation ran out of time. Expected during normal
    /// stream polling; not logged as an error.
    #[error("Operation timed out")]
    Timeout,

    /// A wait was cancelled by its cancel signal. Expected; not logged as
    /// an error.
    #[error("Operation cancelled")]
    Cancelled,

    /// Failure that may succeed on retry (I/O hiccups, timeouts upstream)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Unrecoverable failure
    #[error("Fatal: {0}")]
    Fatal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Checkpoint storage error
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] trellis_checkpoint::CheckpointError),
}

impl ServerError {
    /// Whether the executor should reschedule a run that failed with this
    /// error instead of marking it failed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ServerError::Transient(_) | ServerError::Timeout | ServerError::Io(_)
        )
    }

    /// Shorthand for a not-found error over any id type
    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        ServerError::NotFound(format!("{kind} {id}"))
    }
}
