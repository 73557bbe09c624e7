//! Error types for the file watcher.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Path {path} overlaps registered root {existing}")]
    Overlap { path: PathBuf, existing: PathBuf },

    #[error("Path {path} is not registered")]
    NotRegistered { path: PathBuf },

    #[error("Failed to walk {path}: {reason}")]
    WalkFailed { path: PathBuf, reason: String },

    #[error("Registration of {path} was aborted by a concurrent unregister")]
    RegistrationAborted { path: PathBuf },

    #[error("Watcher is closed")]
    Closed,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

/// Result type for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;
