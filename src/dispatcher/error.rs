//! Error types for the event dispatcher.

use thiserror::Error;

/// Errors from dispatcher operations.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Listener signature mismatch for '{event}': expected ({expected}), found ({found})")]
    SignatureMismatch {
        event: String,
        expected: String,
        found: String,
    },

    #[error("Parameters do not match listener for '{event}': {reason}")]
    ParameterMismatch { event: String, reason: String },

    #[error("Listener for '{event}' failed: {source}")]
    ListenerFailed {
        event: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Dispatcher is closed")]
    Closed,
}

impl DispatchError {
    /// True when the error came from the caller's scope being cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled)
    }
}

/// Result type for dispatcher operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
