//! Shared types for sync cycles and status reporting.

use fieldsync_storage::PendingCounts;
use serde::{Deserialize, Serialize};

/// Upload outcome for one entity collection within a cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTally {
    pub uploaded: u32,
    pub failed: u32,
}

impl CollectionTally {
    pub(crate) fn record(&mut self, ok: bool) {
        if ok {
            self.uploaded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Outcome for queued intents within a cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTally {
    pub processed: u32,
    pub failed: u32,
}

/// Aggregate counts reported by `sync-complete`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResults {
    pub projects: CollectionTally,
    pub images: CollectionTally,
    #[serde(rename = "analysis")]
    pub analyses: CollectionTally,
    pub queue: QueueTally,
}

impl SyncResults {
    pub fn total_failed(&self) -> u32 {
        self.projects.failed + self.images.failed + self.analyses.failed + self.queue.failed
    }

    pub fn total_uploaded(&self) -> u32 {
        self.projects.uploaded
            + self.images.uploaded
            + self.analyses.uploaded
            + self.queue.processed
    }
}

/// Snapshot for the dashboard's status badge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub pending_counts: PendingCounts,
}

/// Response of the backend's `GET /health`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}
