//! Per-cycle bookkeeping that keeps queue intents and entity pushes from
//! sending the same record twice.
//!
//! A create or update intent that names a record the cycle already pushed
//! is settled by that push: it is dequeued when the push was acknowledged
//! and counted as failed when it was not. An intent naming a record the
//! cycle did not push needs a store lookup. Deletes and opaque payloads are
//! dispatched to the backend on their own.

use fieldsync_storage::{Collection, QueueAction, QueueItem};
use std::collections::HashMap;

/// How one queued intent is handled this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Covered by the push of the tracked record.
    FollowsEntity { collection: Collection, id: String },
    /// Sent to `/sync/{type}` as-is.
    Dispatch,
}

/// Routes an intent by action and target.
pub fn route(item: &QueueItem) -> Route {
    match item.action {
        QueueAction::Create | QueueAction::Update => match item.target_id() {
            Some(id) => Route::FollowsEntity {
                collection: item.kind.collection(),
                id: id.to_string(),
            },
            None => Route::Dispatch,
        },
        QueueAction::Delete => Route::Dispatch,
    }
}

/// What the cycle should do with an intent once entity pushes are done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The record push was acknowledged; drop the intent.
    Settled,
    /// The record push failed; keep the intent and count a retry.
    Failed,
    /// Names a record this cycle did not push; ask the store.
    Lookup { collection: Collection, id: String },
    /// Nothing local covers it.
    Dispatch,
}

/// Outcomes of the entity pushes made in one cycle.
#[derive(Debug, Default)]
pub struct CycleOutbox {
    pushed: HashMap<(Collection, String), bool>,
}

impl CycleOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, collection: Collection, id: &str, acknowledged: bool) {
        self.pushed.insert((collection, id.to_string()), acknowledged);
    }

    pub fn disposition(&self, item: &QueueItem) -> Disposition {
        match route(item) {
            Route::Dispatch => Disposition::Dispatch,
            Route::FollowsEntity { collection, id } => {
                match self.pushed.get(&(collection, id.clone())) {
                    Some(true) => Disposition::Settled,
                    Some(false) => Disposition::Failed,
                    None => Disposition::Lookup { collection, id },
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pushed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pushed.is_empty()
    }
}
