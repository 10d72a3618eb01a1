//! Offline-first sync for the survey dashboard.
//!
//! Provides:
//! - A connectivity monitor fed by the platform's online/offline signal
//! - An event bus for sync lifecycle events
//! - An HTTP client for the backend's `/sync/*` endpoints
//! - The sync engine that drains the local store into the backend on a
//!   timer, on reconnect and on demand

pub mod api_client;
pub mod config;
pub mod connectivity;
pub mod engine;
pub mod error;
pub mod events;
pub mod outbox;
pub mod types;

pub use api_client::{BackendClient, SyncBackend};
pub use config::SyncConfig;
pub use connectivity::ConnectivityMonitor;
pub use engine::{SyncEngine, SyncEngineHandle};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, ListenerId, SyncEvent};
pub use types::*;
