//! Typed sync lifecycle events.
//!
//! Two ways to listen: synchronous callbacks registered with
//! [`EventBus::add_listener`] (what the dashboard uses to refresh its badge),
//! and a broadcast receiver from [`EventBus::subscribe`] for async consumers.

use crate::types::SyncResults;
use fieldsync_storage::now_ms;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Events emitted by the connectivity monitor and the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SyncEvent {
    SyncStart { at: i64 },
    SyncComplete { at: i64, results: SyncResults },
    /// The cycle could not enumerate pending work.
    SyncError { at: i64, error: String },
    Online { at: i64 },
    Offline { at: i64 },
    DataCleared { at: i64 },
}

impl SyncEvent {
    pub fn sync_start() -> Self {
        Self::SyncStart { at: now_ms() }
    }

    pub fn sync_complete(results: SyncResults) -> Self {
        Self::SyncComplete {
            at: now_ms(),
            results,
        }
    }

    pub fn sync_error(error: impl ToString) -> Self {
        Self::SyncError {
            at: now_ms(),
            error: error.to_string(),
        }
    }

    pub fn connectivity(online: bool) -> Self {
        if online {
            Self::Online { at: now_ms() }
        } else {
            Self::Offline { at: now_ms() }
        }
    }

    pub fn data_cleared() -> Self {
        Self::DataCleared { at: now_ms() }
    }

    /// Wire name, as used by the dashboard.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SyncStart { .. } => "sync-start",
            Self::SyncComplete { .. } => "sync-complete",
            Self::SyncError { .. } => "sync-error",
            Self::Online { .. } => "online",
            Self::Offline { .. } => "offline",
            Self::DataCleared { .. } => "data-cleared",
        }
    }
}

/// Handle returned by [`EventBus::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

struct Inner {
    sender: broadcast::Sender<SyncEvent>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

/// Event bus shared by the monitor, the engine and the dashboard.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a new event bus with the given broadcast capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                sender,
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Delivers an event to every callback, then to every subscriber.
    pub fn emit(&self, event: SyncEvent) {
        // Snapshot so a listener may add or remove listeners.
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }

        // No receivers is fine.
        let _ = self.inner.sender.send(event);
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns false if the listener was already removed.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
