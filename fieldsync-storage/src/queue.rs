//! Sync queue of pending intents that no entity row can express.
//!
//! Delete intents are the main tenant: once the local row is gone, the queue
//! item is the only record that the backend still has to hear about it.

use crate::error::{StorageError, StorageResult};
use crate::local_store::LocalStore;
use crate::model::{EntityKind, QueueAction, QueueItem, new_record_id, now_ms};
use duckdb::{Connection, params};
use serde_json::Value;
use tracing::debug;

impl LocalStore {
    /// Appends an intent to the queue.
    pub fn enqueue(
        &self,
        kind: EntityKind,
        action: QueueAction,
        data: Value,
    ) -> StorageResult<QueueItem> {
        let item = QueueItem {
            id: new_record_id(),
            kind,
            action,
            data,
            timestamp: now_ms(),
            retry_count: 0,
        };
        let data_json = serde_json::to_string(&item.data)?;

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO sync_queue (id, item_type, action, data_json, timestamp, retry_count)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
            params![
                item.id,
                item.kind.as_str(),
                item.action.as_str(),
                data_json,
                item.timestamp,
            ],
        )?;
        debug!(id = %item.id, kind = %kind, action = %action, "queued sync intent");
        Ok(item)
    }

    /// Every queued intent, oldest first.
    pub fn list_queue(&self) -> StorageResult<Vec<QueueItem>> {
        let conn = self.lock()?;
        fetch_queue(&conn)
    }

    /// Removes a processed intent. Removing an absent id is a no-op.
    pub fn dequeue(&self, id: &str) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM sync_queue WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Counts one more failed attempt and returns the new retry count.
    pub fn record_queue_failure(&self, id: &str) -> StorageResult<u32> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE sync_queue SET retry_count = retry_count + 1 WHERE id = ?",
            params![id],
        )?;
        if changed == 0 {
            return Err(StorageError::not_found("sync_queue", id));
        }
        let retry_count: i32 = conn.query_row(
            "SELECT retry_count FROM sync_queue WHERE id = ?",
            params![id],
            |row| row.get(0),
        )?;
        Ok(retry_count.max(0) as u32)
    }
}

pub(crate) fn fetch_queue(conn: &Connection) -> StorageResult<Vec<QueueItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, item_type, action, data_json, timestamp, retry_count \
         FROM sync_queue ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i32>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, kind, action, data_json, timestamp, retry_count)| {
            Ok(QueueItem {
                kind: kind.parse().map_err(StorageError::Corrupt)?,
                action: action.parse().map_err(StorageError::Corrupt)?,
                data: serde_json::from_str(&data_json)?,
                id,
                timestamp,
                retry_count: retry_count.max(0) as u32,
            })
        })
        .collect()
}
