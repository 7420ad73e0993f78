//! SQL DDL for all Mnemos tables.
//!
//! Defines `memory_entries`, `embeddings`, `memory_associations`,
//! `conversation_summaries`, `memory_log`, and `schema_meta`. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.
//!
//! Vectors live in a plain BLOB column (little-endian f32) and are compared
//! with sqlite-vec's `vec_distance_cosine`, so nearest-neighbor queries can be
//! combined with ordinary `WHERE` filters on scope and owner.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- Atomic memories
CREATE TABLE IF NOT EXISTS memory_entries (
    id TEXT PRIMARY KEY,
    scope TEXT NOT NULL CHECK(scope IN ('personal','team','global')),
    owner_id TEXT,
    type TEXT NOT NULL CHECK(type IN ('fact','preference','skill_note','observation')),
    content TEXT NOT NULL,
    importance REAL NOT NULL CHECK(importance >= 0.0 AND importance <= 1.0),
    strength REAL NOT NULL DEFAULT 1.0 CHECK(strength >= 0.0 AND strength <= 1.0),
    decay_rate REAL NOT NULL CHECK(decay_rate > 0.0),
    last_accessed_at TEXT,
    strength_updated_at TEXT,
    access_count INTEGER NOT NULL DEFAULT 0 CHECK(access_count >= 0),
    source TEXT NOT NULL CHECK(source IN ('explicit','inferred','consolidation')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    CHECK((scope = 'global') = (owner_id IS NULL))
);

CREATE INDEX IF NOT EXISTS idx_entries_partition ON memory_entries(scope, owner_id);
CREATE INDEX IF NOT EXISTS idx_entries_strength ON memory_entries(strength);

-- One vector per (entry, kind)
CREATE TABLE IF NOT EXISTS embeddings (
    entry_id TEXT NOT NULL,
    entry_kind TEXT NOT NULL CHECK(entry_kind IN ('memory','episode')),
    dimensions INTEGER NOT NULL,
    vector BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (entry_id, entry_kind)
);

-- Undirected association graph, stored with source_id < target_id
CREATE TABLE IF NOT EXISTS memory_associations (
    source_id TEXT NOT NULL REFERENCES memory_entries(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES memory_entries(id) ON DELETE CASCADE,
    weight REAL NOT NULL CHECK(weight >= 0.0 AND weight <= 1.0),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (source_id, target_id),
    CHECK(source_id < target_id)
);

CREATE INDEX IF NOT EXISTS idx_associations_target ON memory_associations(target_id);

-- Episodic rollups written by an external summarizer
CREATE TABLE IF NOT EXISTS conversation_summaries (
    id TEXT PRIMARY KEY,
    owner_id TEXT,
    team_id TEXT,
    summary TEXT NOT NULL,
    topics TEXT NOT NULL DEFAULT '[]',
    decisions TEXT NOT NULL DEFAULT '[]',
    period_start TEXT NOT NULL,
    period_end TEXT NOT NULL,
    created_at TEXT NOT NULL,
    CHECK(owner_id IS NOT NULL OR team_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_summaries_owner ON conversation_summaries(owner_id);
CREATE INDEX IF NOT EXISTS idx_summaries_team ON conversation_summaries(team_id);

-- Audit log
CREATE TABLE IF NOT EXISTS memory_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','reconsolidate','merge','prune','episode')),
    memory_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_log_memory ON memory_log(memory_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
