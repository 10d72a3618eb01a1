//! Local store: every offline collection in one DuckDB table.
//!
//! Records are stored as JSON documents next to the columns the sync
//! protocol filters on (`synced`, `project_id`, `image_id`). Those columns are
//! authoritative for the sync envelope; the document is patched from them on
//! read.

use crate::error::{StorageError, StorageResult};
use crate::model::{
    Collection, CollectionCount, ImageStats, IndexQuery, PendingCounts, StorageStats,
    SyncEnvelope, Syncable, UnsyncedItems, new_record_id, now_ms,
};
use duckdb::{Connection, params};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Envelope fields a patch may not touch.
const PROTECTED_FIELDS: &[&str] = &["id", "synced", "syncedAt", "timestamp"];

const RECORD_COLUMNS: &str = "id, data_json, blob, synced, synced_at, timestamp, version";

/// Persistent offline store backed by DuckDB.
///
/// Cheap to clone; all clones share one connection, which serializes writes
/// so concurrent `create` calls never interleave partial rows.
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    /// Opens or creates a store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = crate::open_duckdb_with_wal_recovery(path, "256MB", 2)?;
        initialize_store_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_store_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Unavailable("connection lock poisoned".to_string()))
    }

    // ── CRUD ──

    /// Persists a new local record.
    ///
    /// Assigns an id when the record has none and always starts it unsynced.
    pub fn create<T: Syncable>(&self, mut record: T) -> StorageResult<T> {
        let now = now_ms();
        {
            let envelope = record.envelope_mut();
            if envelope.id.is_empty() {
                envelope.id = new_record_id();
            }
            envelope.synced = false;
            envelope.synced_at = None;
            envelope.timestamp = now;
        }
        record.on_local_mutation(now);

        let conn = self.lock()?;
        record.envelope_mut().version = next_version(&conn, T::COLLECTION, record.id())?;
        upsert_record(&conn, &record)?;
        debug!(collection = %T::COLLECTION, id = record.id(), "created local record");
        Ok(record)
    }

    /// Caches a record the backend has already acknowledged.
    pub fn cache_acknowledged<T: Syncable>(&self, mut record: T) -> StorageResult<T> {
        let now = now_ms();
        {
            let envelope = record.envelope_mut();
            if envelope.id.is_empty() {
                envelope.id = new_record_id();
            }
            if envelope.timestamp == 0 {
                envelope.timestamp = now;
            }
            envelope.synced = true;
            envelope.synced_at = Some(now);
        }

        let conn = self.lock()?;
        record.envelope_mut().version = next_version(&conn, T::COLLECTION, record.id())?;
        upsert_record(&conn, &record)?;
        Ok(record)
    }

    pub fn get_by_id<T: Syncable>(&self, id: &str) -> StorageResult<Option<T>> {
        let conn = self.lock()?;
        fetch_record(&conn, T::COLLECTION, id)
    }

    /// All records of a collection. Callers must not rely on the order.
    pub fn get_all<T: Syncable>(&self) -> StorageResult<Vec<T>> {
        let conn = self.lock()?;
        let sql = format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ?");
        query_records(&conn, &sql, params![T::COLLECTION.as_str()])
    }

    /// Secondary-index lookup.
    pub fn get_all_by_index<T: Syncable>(&self, query: &IndexQuery) -> StorageResult<Vec<T>> {
        if !query.supported_on(T::COLLECTION) {
            return Err(StorageError::UnsupportedIndex {
                index: query.name(),
                collection: T::COLLECTION,
            });
        }

        let conn = self.lock()?;
        let collection = T::COLLECTION.as_str();
        match query {
            IndexQuery::ProjectId(project_id) => query_records(
                &conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND project_id = ?"
                ),
                params![collection, project_id],
            ),
            IndexQuery::ImageId(image_id) => query_records(
                &conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND image_id = ?"
                ),
                params![collection, image_id],
            ),
            IndexQuery::Synced(synced) => query_records(
                &conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND synced = ? \
                     ORDER BY timestamp, id"
                ),
                params![collection, *synced],
            ),
        }
    }

    /// Merges a JSON patch into a record's top-level fields.
    ///
    /// Any local edit invalidates a previous sync: the record comes back
    /// with `synced = false` and no `synced_at`.
    pub fn update<T: Syncable>(&self, id: &str, patch: &Value) -> StorageResult<T> {
        let patch = patch
            .as_object()
            .ok_or_else(|| StorageError::InvalidPatch("patch must be a JSON object".to_string()))?;

        let conn = self.lock()?;
        let mut current: T = fetch_record(&conn, T::COLLECTION, id)?
            .ok_or_else(|| StorageError::not_found(T::COLLECTION.as_str(), id))?;

        let mut doc = serde_json::to_value(&current)?;
        if let Some(obj) = doc.as_object_mut() {
            for (key, value) in patch {
                if PROTECTED_FIELDS.contains(&key.as_str()) {
                    continue;
                }
                obj.insert(key.clone(), value.clone());
            }
        }

        let mut updated: T = serde_json::from_value(doc)
            .map_err(|e| StorageError::InvalidPatch(e.to_string()))?;
        if let Some(blob) = current.take_blob() {
            updated.attach_blob(blob);
        }
        *updated.envelope_mut() = SyncEnvelope {
            id: current.id().to_string(),
            synced: false,
            synced_at: None,
            timestamp: current.envelope().timestamp,
            version: current.envelope().version + 1,
        };
        updated.on_local_mutation(now_ms());

        upsert_record(&conn, &updated)?;
        debug!(collection = %T::COLLECTION, id, "updated local record");
        Ok(updated)
    }

    /// Removes a record. Deleting an absent id is a no-op.
    ///
    /// References from other collections are left dangling.
    pub fn delete(&self, collection: Collection, id: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM records WHERE collection = ? AND id = ?",
            params![collection.as_str(), id],
        )?;
        Ok(())
    }

    /// Records a backend acknowledgment for one record, whatever version the
    /// store currently holds.
    pub fn mark_synced(&self, collection: Collection, id: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE records SET synced = TRUE, synced_at = ? WHERE collection = ? AND id = ?",
            params![now_ms(), collection.as_str(), id],
        )?;
        if changed == 0 {
            return Err(StorageError::not_found(collection.as_str(), id));
        }
        Ok(())
    }

    /// Records a backend acknowledgment for the version that was pushed.
    ///
    /// Returns `false` and leaves the record unsynced when it was mutated
    /// after `version` was read; the newer content still has to be pushed.
    pub fn mark_synced_at_version(
        &self,
        collection: Collection,
        id: &str,
        version: i64,
    ) -> StorageResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE records SET synced = TRUE, synced_at = ? \
             WHERE collection = ? AND id = ? AND version = ?",
            params![now_ms(), collection.as_str(), id, version],
        )?;
        if changed > 0 {
            return Ok(true);
        }
        match current_version(&conn, collection, id)? {
            Some(current) => {
                debug!(
                    %collection,
                    id,
                    pushed = version,
                    current,
                    "acknowledged version superseded"
                );
                Ok(false)
            }
            None => Err(StorageError::not_found(collection.as_str(), id)),
        }
    }

    /// Sync flag of a record, or `None` when the store does not hold it.
    pub fn sync_state(&self, collection: Collection, id: &str) -> StorageResult<Option<bool>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            "SELECT synced FROM records WHERE collection = ? AND id = ?",
            params![collection.as_str(), id],
            |row| row.get::<_, bool>(0),
        );
        match result {
            Ok(synced) => Ok(Some(synced)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Wipes every collection and the queue in one transaction.
    pub fn clear_all(&self) -> StorageResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM records", [])?;
        tx.execute("DELETE FROM sync_queue", [])?;
        tx.commit()?;
        debug!("cleared all offline data");
        Ok(())
    }

    // ── Aggregates ──

    /// Counts every record, synced or not.
    pub fn storage_stats(&self) -> StorageResult<StorageStats> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT collection, COUNT(*), CAST(COALESCE(SUM(size_bytes), 0) AS BIGINT) \
             FROM records GROUP BY collection",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut stats = StorageStats::default();
        for (collection, count, size) in rows {
            let count = count.max(0) as u64;
            match parse_collection(&collection)? {
                Collection::Images => {
                    stats.images = ImageStats {
                        count,
                        total_size_bytes: size.max(0) as u64,
                    }
                }
                Collection::Analyses => stats.analyses = CollectionCount { count },
                Collection::Projects => stats.projects = CollectionCount { count },
            }
        }
        stats.queue = CollectionCount {
            count: count_queue(&conn)?,
        };
        Ok(stats)
    }

    /// Unsynced records per collection plus the queue length.
    pub fn pending_counts(&self) -> StorageResult<PendingCounts> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT collection, COUNT(*) FROM records WHERE synced = FALSE GROUP BY collection",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        let mut counts = PendingCounts::default();
        for (collection, count) in rows {
            let count = count.max(0) as u64;
            match parse_collection(&collection)? {
                Collection::Images => counts.images = count,
                Collection::Analyses => counts.analyses = count,
                Collection::Projects => counts.projects = count,
            }
        }
        counts.queue = count_queue(&conn)?;
        Ok(counts)
    }

    /// The outbox: every unsynced entity plus every queued intent.
    ///
    /// Entities come back oldest capture first; the queue in enqueue order.
    pub fn unsynced_items(&self) -> StorageResult<UnsyncedItems> {
        let conn = self.lock()?;
        Ok(UnsyncedItems {
            projects: fetch_unsynced(&conn)?,
            images: fetch_unsynced(&conn)?,
            analyses: fetch_unsynced(&conn)?,
            queue: crate::queue::fetch_queue(&conn)?,
        })
    }
}

// -- Row helpers --

struct RawRecord {
    id: String,
    data_json: String,
    blob: Option<Vec<u8>>,
    synced: bool,
    synced_at: Option<i64>,
    timestamp: i64,
    version: i64,
}

impl RawRecord {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            data_json: row.get(1)?,
            blob: row.get(2)?,
            synced: row.get(3)?,
            synced_at: row.get(4)?,
            timestamp: row.get(5)?,
            version: row.get(6)?,
        })
    }

    fn into_entity<T: Syncable>(self) -> StorageResult<T> {
        let mut record: T = serde_json::from_str(&self.data_json)
            .map_err(|e| StorageError::Corrupt(format!("{} {}: {e}", T::COLLECTION, self.id)))?;
        *record.envelope_mut() = SyncEnvelope {
            id: self.id,
            synced: self.synced,
            synced_at: self.synced_at,
            timestamp: self.timestamp,
            version: self.version,
        };
        if let Some(blob) = self.blob {
            record.attach_blob(blob);
        }
        Ok(record)
    }
}

fn upsert_record<T: Syncable>(conn: &Connection, record: &T) -> StorageResult<()> {
    let envelope = record.envelope();
    let keys = record.index_keys();
    let data_json = serde_json::to_string(record)?;
    let size_bytes = i64::try_from(record.size_bytes()).map_err(|_| {
        StorageError::InvalidPatch(format!(
            "{} {}: size {} exceeds the storable range",
            T::COLLECTION,
            envelope.id,
            record.size_bytes()
        ))
    })?;

    conn.execute(
        r#"
        INSERT OR REPLACE INTO records (
            collection, id, project_id, image_id,
            synced, synced_at, timestamp, version, size_bytes,
            data_json, blob
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            T::COLLECTION.as_str(),
            envelope.id,
            keys.project_id.as_deref(),
            keys.image_id.as_deref(),
            envelope.synced,
            envelope.synced_at,
            envelope.timestamp,
            envelope.version,
            size_bytes,
            data_json,
            record.blob(),
        ],
    )?;
    Ok(())
}

fn fetch_record<T: Syncable>(
    conn: &Connection,
    collection: Collection,
    id: &str,
) -> StorageResult<Option<T>> {
    let result = conn.query_row(
        &format!("SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND id = ?"),
        params![collection.as_str(), id],
        RawRecord::from_row,
    );

    match result {
        Ok(raw) => Ok(Some(raw.into_entity()?)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn query_records<T: Syncable>(
    conn: &Connection,
    sql: &str,
    params: impl duckdb::Params,
) -> StorageResult<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, RawRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(RawRecord::into_entity).collect()
}

fn fetch_unsynced<T: Syncable>(conn: &Connection) -> StorageResult<Vec<T>> {
    query_records(
        conn,
        &format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE collection = ? AND synced = FALSE \
             ORDER BY timestamp, id"
        ),
        params![T::COLLECTION.as_str()],
    )
}

fn current_version(
    conn: &Connection,
    collection: Collection,
    id: &str,
) -> StorageResult<Option<i64>> {
    let result = conn.query_row(
        "SELECT version FROM records WHERE collection = ? AND id = ?",
        params![collection.as_str(), id],
        |row| row.get::<_, i64>(0),
    );
    match result {
        Ok(version) => Ok(Some(version)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writing over an existing id still counts as a new local mutation.
fn next_version(conn: &Connection, collection: Collection, id: &str) -> StorageResult<i64> {
    Ok(current_version(conn, collection, id)?.map_or(1, |v| v + 1))
}

fn count_queue(conn: &Connection) -> StorageResult<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

fn parse_collection(raw: &str) -> StorageResult<Collection> {
    raw.parse().map_err(StorageError::Corrupt)
}

// -- Schema --

fn initialize_store_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            collection VARCHAR NOT NULL,
            id VARCHAR NOT NULL,
            project_id VARCHAR,
            image_id VARCHAR,
            synced BOOLEAN NOT NULL DEFAULT FALSE,
            synced_at BIGINT,
            timestamp BIGINT NOT NULL,
            -- Bumped on every local write; acknowledgments must match it.
            version BIGINT NOT NULL DEFAULT 0,
            size_bytes BIGINT NOT NULL DEFAULT 0,
            data_json TEXT NOT NULL,
            blob BLOB,
            PRIMARY KEY (collection, id)
        );
        CREATE INDEX IF NOT EXISTS idx_records_project ON records(collection, project_id);
        CREATE INDEX IF NOT EXISTS idx_records_image ON records(collection, image_id);
        CREATE INDEX IF NOT EXISTS idx_records_synced ON records(collection, synced);

        -- Intents with no entity row behind them (deletes, opaque payloads).
        -- Rows are only ever touched to bump retry_count, and removed once
        -- the backend has accepted them.
        CREATE SEQUENCE IF NOT EXISTS sync_queue_seq;
        CREATE TABLE IF NOT EXISTS sync_queue (
            seq BIGINT NOT NULL DEFAULT nextval('sync_queue_seq'),
            id VARCHAR PRIMARY KEY,
            item_type VARCHAR NOT NULL,
            action VARCHAR NOT NULL,
            data_json TEXT NOT NULL,
            timestamp BIGINT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_sync_queue_seq ON sync_queue(seq);
        "#,
    )?;
    Ok(())
}
