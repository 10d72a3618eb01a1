//! DuckDB-backed offline store for the survey dashboard.
//!
//! Holds everything captured while the device is offline until the sync
//! engine has pushed it to the backend.
//!
//! # Architecture
//!
//! - Images, analyses and projects share one `records` table, keyed by
//!   `(collection, id)`, as JSON documents plus the indexed sync columns
//! - Image bytes live in a BLOB column, never inside the JSON document
//! - Intents with no persisted entity (deletes, opaque payloads) live in
//!   the `sync_queue` table
//! - Schema is created automatically on open

mod error;
mod local_store;
mod model;
mod queue;

pub use error::{StorageError, StorageResult};
pub use local_store::LocalStore;
pub use model::*;

/// Opens the offline database file, recovering from a torn write-ahead log.
///
/// Survey tablets routinely kill the dashboard tab in the middle of a write,
/// which leaves a `.wal` next to the database that DuckDB refuses to replay.
/// When the first open fails and such a log exists it is discarded and the
/// open is retried once; anything the log held was never acknowledged by the
/// backend and is captured again on the next edit. Other open failures are
/// returned unchanged.
///
/// The connection is capped at `memory_limit` and `threads` so the store
/// stays small next to the browser that hosts it.
pub fn open_duckdb_with_wal_recovery(
    path: &std::path::Path,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<duckdb::Connection> {
    let conn = match duckdb::Connection::open(path) {
        Ok(conn) => conn,
        Err(first_err) => {
            let wal_path = stale_wal_path(path);
            if !wal_path.exists() {
                return Err(first_err.into());
            }
            tracing::warn!(
                db = %path.display(),
                wal = %wal_path.display(),
                error = %first_err,
                "offline database did not open, discarding its WAL"
            );
            std::fs::remove_file(&wal_path).map_err(|e| {
                StorageError::Unavailable(format!("could not remove {}: {e}", wal_path.display()))
            })?;
            duckdb::Connection::open(path)?
        }
    };
    apply_resource_limits(&conn, memory_limit, threads)?;
    Ok(conn)
}

/// `offline.duckdb` logs to `offline.duckdb.wal`.
fn stale_wal_path(path: &std::path::Path) -> std::path::PathBuf {
    let mut wal = path.as_os_str().to_owned();
    wal.push(".wal");
    std::path::PathBuf::from(wal)
}

fn apply_resource_limits(
    conn: &duckdb::Connection,
    memory_limit: &str,
    threads: u32,
) -> StorageResult<()> {
    conn.execute_batch(&format!(
        "PRAGMA memory_limit='{memory_limit}'; PRAGMA threads={threads};"
    ))?;
    Ok(())
}
