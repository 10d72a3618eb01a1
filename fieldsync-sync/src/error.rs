//! Sync error types.

use fieldsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing offline data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A cycle is already running; the attempt was dropped, not queued.
    #[error("Already syncing")]
    AlreadySyncing,

    #[error("cannot sync while offline")]
    Offline,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Timeout, refused connection or a non-2xx status.
    #[error("network failure: {0}")]
    Network(String),

    /// The backend refused the payload itself.
    #[error("backend rejected payload ({status}): {body}")]
    MalformedPayload { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("sync engine not running")]
    NotRunning,

    #[error("background task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// True for per-item transport failures that the next cycle retries.
    pub fn is_network_failure(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Http(_) | Self::MalformedPayload { .. }
        )
    }

    /// True when the local store could not be used at all.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_unavailable())
    }
}
