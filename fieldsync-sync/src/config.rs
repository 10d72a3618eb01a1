//! Sync engine configuration.

use crate::error::{SyncError, SyncResult};
use fieldsync_storage::LocalStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the offline sync engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the analysis backend (e.g., "http://localhost:8000").
    pub api_base_url: String,

    /// Period of the background sync timer (seconds).
    pub sync_interval_secs: u64,

    /// Timeout applied to each backend request (seconds).
    pub request_timeout_secs: u64,

    /// Optional bearer token sent with every backend request.
    pub api_token: Option<String>,

    /// Location of the offline database, opened by [`SyncConfig::open_store`].
    /// `None` keeps it in memory.
    pub database_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            sync_interval_secs: 30,
            request_timeout_secs: 30,
            api_token: None,
            database_path: None,
        }
    }
}

impl SyncConfig {
    /// Parses a JSON config; missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> SyncResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(SyncError::Config("api_base_url must not be empty".to_string()));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            return Err(SyncError::Config(format!(
                "api_base_url must be an http(s) URL, got {}",
                self.api_base_url
            )));
        }
        if self.sync_interval_secs == 0 {
            return Err(SyncError::Config("sync_interval_secs must be positive".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::Config("request_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Opens the offline store this config points at.
    pub fn open_store(&self) -> SyncResult<LocalStore> {
        let store = match &self.database_path {
            Some(path) => LocalStore::open(path)?,
            None => LocalStore::open_in_memory()?,
        };
        Ok(store)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Base URL without a trailing slash.
    pub(crate) fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }
}
