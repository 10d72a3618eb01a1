//! Sync engine.
//!
//! Main loop that coordinates:
//! - Periodic cycles on the sync interval (only while online)
//! - An immediate cycle on every offline to online transition
//! - Manual cycles requested by the dashboard
//! - Command processing (stop)
//!
//! A cycle pushes unsynced projects, then images, then analyses, then
//! drains the sync queue. Per-item failures never abort a cycle; the item
//! stays pending and the next cycle retries it.

use crate::api_client::SyncBackend;
use crate::config::SyncConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, ListenerId, SyncEvent};
use crate::outbox::{CycleOutbox, Disposition};
use crate::types::{SyncResults, SyncStatus};

use fieldsync_storage::{
    Collection, LocalStore, QueueItem, StorageResult, SyncEnvelope, Syncable,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

enum EngineCommand {
    Stop,
}

/// Handle to a running engine loop.
pub struct SyncEngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    task: JoinHandle<()>,
}

impl SyncEngineHandle {
    /// Stops the loop and waits for it to exit. A cycle in flight finishes
    /// first.
    pub async fn stop(self) -> SyncResult<()> {
        self.command_tx
            .send(EngineCommand::Stop)
            .await
            .map_err(|_| SyncError::NotRunning)?;
        self.task
            .await
            .map_err(|e| SyncError::Task(e.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Releases the re-entrancy flag on every exit path.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Pushes offline records to the backend.
pub struct SyncEngine {
    store: LocalStore,
    backend: Arc<dyn SyncBackend>,
    connectivity: ConnectivityMonitor,
    events: EventBus,
    config: SyncConfig,
    syncing: AtomicBool,
}

impl SyncEngine {
    /// Fails with [`SyncError::Config`] on an invalid config.
    pub fn new(
        store: LocalStore,
        backend: Arc<dyn SyncBackend>,
        connectivity: ConnectivityMonitor,
        events: EventBus,
        config: SyncConfig,
    ) -> SyncResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            store,
            backend,
            connectivity,
            events,
            config,
            syncing: AtomicBool::new(false),
        }))
    }

    /// Spawns the background loop on the current runtime.
    pub fn start(self: &Arc<Self>) -> SyncEngineHandle {
        let (command_tx, command_rx) = mpsc::channel(8);
        // Subscribe before spawning so no transition is missed.
        let online_rx = self.connectivity.watch();
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move { engine.run(command_rx, online_rx).await });
        SyncEngineHandle { command_tx, task }
    }

    async fn run(
        self: Arc<Self>,
        mut command_rx: mpsc::Receiver<EngineCommand>,
        mut online_rx: watch::Receiver<bool>,
    ) {
        info!(
            "[SYNC] engine started, interval {}s",
            self.config.sync_interval_secs
        );

        let mut interval = tokio::time::interval(self.config.sync_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Skip first immediate tick
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.connectivity.is_online() {
                        self.attempt("interval").await;
                    }
                }
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        info!("[SYNC] connectivity monitor dropped, stopping");
                        break;
                    }
                    let online = *online_rx.borrow_and_update();
                    if online {
                        self.attempt("reconnect").await;
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(EngineCommand::Stop) => {
                            info!("[SYNC] engine stopping");
                            break;
                        }
                        None => {
                            info!("[SYNC] command channel closed, stopping");
                            break;
                        }
                    }
                }
            }
        }

        info!("[SYNC] engine stopped");
    }

    /// A triggered cycle. Failures are already reported through events.
    async fn attempt(&self, trigger: &str) {
        match self.run_cycle().await {
            Ok(results) => debug!(
                "[SYNC] {trigger} cycle done: {} uploaded, {} failed",
                results.total_uploaded(),
                results.total_failed()
            ),
            Err(SyncError::AlreadySyncing) => {
                debug!("[SYNC] {trigger} cycle skipped: already syncing")
            }
            Err(e) => debug!("[SYNC] {trigger} cycle aborted: {e}"),
        }
    }

    /// Runs one cycle now.
    ///
    /// Returns [`SyncError::Offline`] without starting a cycle while offline
    /// and [`SyncError::AlreadySyncing`] if a cycle is in flight.
    pub async fn manual_sync(&self) -> SyncResult<SyncResults> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        self.run_cycle().await
    }

    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    fn try_claim(&self) -> Option<CycleGuard<'_>> {
        self.syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard(&self.syncing))
    }

    async fn run_cycle(&self) -> SyncResult<SyncResults> {
        let _guard = self.try_claim().ok_or(SyncError::AlreadySyncing)?;

        self.events.emit(SyncEvent::sync_start());

        let pending = match self.with_store(|store| store.unsynced_items()).await {
            Ok(pending) => pending,
            Err(e) => {
                error!("[SYNC] could not read pending records: {e}");
                self.events.emit(SyncEvent::sync_error(&e));
                return Err(e);
            }
        };
        debug!("[SYNC] cycle started with {} pending items", pending.len());

        let mut results = SyncResults::default();
        let mut outbox = CycleOutbox::new();

        for project in &pending.projects {
            let outcome = self.backend.push_project(project).await;
            let ok = self.settle(Collection::Projects, project.envelope(), outcome).await;
            outbox.record(Collection::Projects, project.id(), ok);
            results.projects.record(ok);
        }

        for image in &pending.images {
            let outcome = self.backend.push_image(image).await;
            let ok = self.settle(Collection::Images, image.envelope(), outcome).await;
            outbox.record(Collection::Images, image.id(), ok);
            results.images.record(ok);
        }

        for analysis in &pending.analyses {
            let outcome = self.backend.push_analysis(analysis).await;
            let ok = self.settle(Collection::Analyses, analysis.envelope(), outcome).await;
            outbox.record(Collection::Analyses, analysis.id(), ok);
            results.analyses.record(ok);
        }

        for item in &pending.queue {
            match self.process_queue_item(item, &outbox).await {
                Some(true) => results.queue.processed += 1,
                Some(false) => results.queue.failed += 1,
                None => {}
            }
        }

        if results.total_failed() > 0 {
            warn!(
                "[SYNC] cycle finished with {} failures ({} succeeded)",
                results.total_failed(),
                results.total_uploaded()
            );
        } else {
            info!("[SYNC] cycle finished: {} items synced", results.total_uploaded());
        }

        self.events.emit(SyncEvent::sync_complete(results));
        Ok(results)
    }

    /// Records the outcome of one entity push. Returns whether the backend
    /// acknowledged it.
    ///
    /// Only the pushed version is marked synced. A record edited while the
    /// push was in flight stays pending for the next cycle.
    async fn settle(
        &self,
        collection: Collection,
        pushed: &SyncEnvelope,
        outcome: SyncResult<()>,
    ) -> bool {
        let id = pushed.id.as_str();
        if let Err(e) = outcome {
            warn!("[SYNC] push of {collection} {id} failed: {e}");
            return false;
        }

        let owned = id.to_string();
        let version = pushed.version;
        match self
            .with_store(move |store| store.mark_synced_at_version(collection, &owned, version))
            .await
        {
            Ok(true) => true,
            Ok(false) => {
                debug!("[SYNC] {collection} {id} changed during push, kept pending");
                true
            }
            // Deleted locally while the push was in flight.
            Err(SyncError::Storage(e)) if e.is_not_found() => {
                warn!("[SYNC] {collection} {id} acknowledged but no longer stored");
                true
            }
            Err(e) => {
                warn!("[SYNC] could not mark {collection} {id} synced: {e}");
                false
            }
        }
    }

    /// `Some(ok)` for an intent resolved this cycle, `None` when it waits
    /// for a record push in a later cycle.
    async fn process_queue_item(&self, item: &QueueItem, outbox: &CycleOutbox) -> Option<bool> {
        let ok = match outbox.disposition(item) {
            Disposition::Settled => true,
            Disposition::Failed => false,
            Disposition::Lookup { collection, id } => {
                let lookup_id = id.clone();
                match self
                    .with_store(move |store| store.sync_state(collection, &lookup_id))
                    .await
                {
                    Ok(Some(true)) => true,
                    Ok(Some(false)) => {
                        debug!("[SYNC] queue item {} waits for {collection} {id}", item.id);
                        return None;
                    }
                    Ok(None) => self.dispatch(item).await,
                    Err(e) => {
                        warn!("[SYNC] lookup of {collection} {id} failed: {e}");
                        false
                    }
                }
            }
            Disposition::Dispatch => self.dispatch(item).await,
        };

        let queue_id = item.id.clone();
        if ok {
            if let Err(e) = self.with_store(move |store| store.dequeue(&queue_id)).await {
                warn!("[SYNC] could not dequeue {}: {e}", item.id);
            }
        } else {
            match self
                .with_store(move |store| store.record_queue_failure(&queue_id))
                .await
            {
                Ok(retries) => debug!("[SYNC] queue item {} failed {retries} times", item.id),
                Err(e) => warn!("[SYNC] could not record failure of {}: {e}", item.id),
            }
        }
        Some(ok)
    }

    async fn dispatch(&self, item: &QueueItem) -> bool {
        match self.backend.dispatch_queue_item(item).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "[SYNC] {} {} intent {} failed: {e}",
                    item.action, item.kind, item.id
                );
                false
            }
        }
    }

    /// Runs a blocking store call off the async workers.
    async fn with_store<F, T>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&LocalStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        let result = tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?;
        Ok(result?)
    }

    // ── Dashboard contract ──

    /// Snapshot for the status badge.
    pub async fn sync_status(&self) -> SyncResult<SyncStatus> {
        let pending_counts = self.with_store(|store| store.pending_counts()).await?;
        Ok(SyncStatus {
            online: self.connectivity.is_online(),
            syncing: self.is_syncing(),
            pending_counts,
        })
    }

    /// Wipes all offline data, synced or not.
    pub async fn clear_offline_data(&self) -> SyncResult<()> {
        self.with_store(|store| store.clear_all()).await?;
        info!("[SYNC] offline data cleared");
        self.events.emit(SyncEvent::data_cleared());
        Ok(())
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.events.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.events.remove_listener(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}
