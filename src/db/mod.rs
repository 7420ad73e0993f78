//! SQLite database bootstrap: extension loading, pragmas, schema and migrations.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use sqlite_vec::sqlite3_vec_init;
use std::path::Path;
use std::sync::Once;
use std::time::Duration;

static SQLITE_VEC_INIT: Once = Once::new();

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Register the sqlite-vec extension globally. Safe to call multiple times.
pub fn load_sqlite_vec() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Open (or create) the Mnemos database at the given path, with all extensions
/// loaded and schema initialized.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    load_sqlite_vec();

    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;

    // WAL lets the reader connection proceed while a write transaction is open
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a read-only connection to an existing database. Must be called after
/// [`open_database`] has created the schema.
pub fn open_reader(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    load_sqlite_vec();
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI,
    )
    .with_context(|| format!("failed to open reader at {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// Open a fresh in-memory database with schema and migrations applied.
/// Used by tests and throwaway sessions.
pub fn open_memory_database() -> Result<Connection> {
    load_sqlite_vec();
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}

/// Convert an f32 embedding slice to raw little-endian bytes for storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            std::mem::size_of_val(embedding),
        )
    }
}

/// Decode a stored vector blob. Trailing bytes that don't form a full f32 are ignored.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Snapshot of database health used by `mnemos doctor`.
#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub integrity_ok: bool,
    pub schema_version: u32,
    pub journal_mode: String,
    pub sqlite_vec_version: String,
    pub embedding_model: Option<String>,
    pub embedding_dimensions: Option<usize>,
    /// Entries with no memory embedding; invisible to search until re-embedded.
    pub entries_missing_embedding: i64,
    /// Embeddings whose width differs from the recorded model width.
    pub mismatched_embeddings: i64,
    pub orphan_associations: i64,
}

pub fn check_database_health(conn: &Connection) -> Result<DatabaseHealth> {
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |r| r.get(0))?;
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
    let sqlite_vec_version: String = conn.query_row("SELECT vec_version()", [], |r| r.get(0))?;
    let embedding_dimensions = migrations::get_embedding_dimensions(conn)?;

    let entries_missing_embedding: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memory_entries m
         WHERE NOT EXISTS (SELECT 1 FROM embeddings e WHERE e.entry_id = m.id AND e.entry_kind = 'memory')",
        [],
        |r| r.get(0),
    )?;
    let mismatched_embeddings: i64 = match embedding_dimensions {
        Some(dims) => conn.query_row(
            "SELECT COUNT(*) FROM embeddings WHERE dimensions != ?1",
            [dims as i64],
            |r| r.get(0),
        )?,
        None => 0,
    };
    let orphan_associations: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memory_associations a
         WHERE NOT EXISTS (SELECT 1 FROM memory_entries m WHERE m.id = a.source_id)
            OR NOT EXISTS (SELECT 1 FROM memory_entries m WHERE m.id = a.target_id)",
        [],
        |r| r.get(0),
    )?;

    Ok(DatabaseHealth {
        integrity_ok: integrity == "ok",
        schema_version: migrations::get_schema_version(conn)?,
        journal_mode,
        sqlite_vec_version,
        embedding_model: migrations::get_embedding_model(conn)?,
        embedding_dimensions,
        entries_missing_embedding,
        mismatched_embeddings,
        orphan_associations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.0];
        let bytes = embedding_to_bytes(&v).to_vec();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(&bytes), v);
    }

    #[test]
    fn fresh_database_is_healthy() {
        let conn = open_memory_database().unwrap();
        let health = check_database_health(&conn).unwrap();
        assert!(health.integrity_ok);
        assert_eq!(health.schema_version, migrations::CURRENT_SCHEMA_VERSION);
        assert_eq!(health.embedding_dimensions, Some(384));
        assert_eq!(health.entries_missing_embedding, 0);
        assert_eq!(health.orphan_associations, 0);
    }

    #[test]
    fn file_database_uses_wal_and_reader_sees_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        let writer = open_database(&path).unwrap();
        let mode: String = writer
            .query_row("PRAGMA journal_mode", [], |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        writer
            .execute(
                "INSERT INTO schema_meta (key, value) VALUES ('probe', 'yes')",
                [],
            )
            .unwrap();
        let reader = open_reader(&path).unwrap();
        let probe: String = reader
            .query_row("SELECT value FROM schema_meta WHERE key = 'probe'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(probe, "yes");
    }
}
