//! Error types for release-state

use thiserror::Error;

/// Errors that can occur in the record storage layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Release record not found
    #[error("Release not found: {release_id}")]
    ReleaseNotFound { release_id: String },

    /// Product record not found
    #[error("Product not found: {product_id}")]
    ProductNotFound { product_id: String },

    /// A record with the same id already exists
    #[error("Record already exists: {id}")]
    AlreadyExists { id: String },

    /// Backend connection or query failure
    #[error("Storage backend failed: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
