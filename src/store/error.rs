//! Error types for the document store.

use thiserror::Error;
use uuid::Uuid;

/// Errors from store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(Uuid),

    #[error("No documents indexed under reference '{0}'")]
    ReferenceNotFound(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Store is closed")]
    Closed,

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Invalid query: {0}")]
    Query(String),

    #[error("Corrupt document in index: {0}")]
    Corrupt(String),

    #[error("Unknown index type '{0}'")]
    UnknownType(String),
}

impl StoreError {
    /// True for both id and reference misses.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound(_) | StoreError::ReferenceNotFound(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StoreError::Cancelled)
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
