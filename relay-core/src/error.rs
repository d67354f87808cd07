//! Errors in the library.
use thiserror::Error;

/// Errors produced by the writer, its chunkers and the stream worker.
///
/// The variants mirror the status classes of the replay service. Only
/// [`RelayError::Unavailable`] is retryable; the stream worker handles it
/// internally by reconnecting. Every other stream status is terminal and is
/// cached on the writer, which returns it from all subsequent operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// A value or argument failed validation.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was called in a state which does not allow it.
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// A blocking operation did not complete within its deadline.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The stream endpoint is temporarily unreachable.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// The stream was terminated by a non retryable error.
    #[error("Internal: {0}")]
    Internal(String),

    /// The operation was aborted because the writer has been closed.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl RelayError {
    /// Returns `true` if the error is transient and the stream worker should
    /// reconnect instead of surfacing it.
    pub fn is_transient(&self) -> bool {
        matches!(self, RelayError::Unavailable(_))
    }
}
