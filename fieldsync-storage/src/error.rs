//! Storage error types.

use crate::model::Collection;
use thiserror::Error;

/// Result type for local store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying engine could not be opened or refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("{scope} record not found: {id}")]
    NotFound { scope: &'static str, id: String },

    #[error("index `{index}` is not defined on {collection}")]
    UnsupportedIndex {
        index: &'static str,
        collection: Collection,
    },

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn not_found(scope: &'static str, id: &str) -> Self {
        Self::NotFound {
            scope,
            id: id.to_string(),
        }
    }

    /// True when the referenced id was absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the store itself could not be used.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<duckdb::Error> for StorageError {
    fn from(err: duckdb::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}
