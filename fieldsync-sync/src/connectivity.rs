//! Online/offline state, decoupled from any one consumer.
//!
//! The platform adapter (browser `online`/`offline` events, a network
//! reachability callback on mobile) reports transitions through
//! [`ConnectivityMonitor::set_online`]. There is no polling fallback; the
//! engine's timer is the safety net.

use crate::events::{EventBus, SyncEvent};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Single source of truth for connectivity.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    state: Arc<watch::Sender<bool>>,
    events: EventBus,
}

impl ConnectivityMonitor {
    /// Starts from the platform's current connectivity signal.
    pub fn new(initially_online: bool, events: EventBus) -> Self {
        let (state, _) = watch::channel(initially_online);
        Self {
            state: Arc::new(state),
            events,
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Records a platform report. Returns true if it was a transition.
    ///
    /// Only transitions emit `online` / `offline`.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            info!("connectivity changed: {}", if online { "online" } else { "offline" });
            self.events.emit(SyncEvent::connectivity(online));
        }
        changed
    }

    /// Receiver that observes every transition.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
