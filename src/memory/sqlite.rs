//! SQLite-backed [`MemoryRepository`].
//!
//! Writes go through a single writer connection; every multi-row change runs
//! in one transaction. File databases also get a read-only connection so
//! searches proceed under WAL while a write transaction is open.
//!
//! Similarity queries use sqlite-vec's `vec_distance_cosine` over the
//! `embeddings` blobs, joined with the partition filter, so they return the
//! exact top-k within a `(scope, owner)` partition.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior,
};
use serde_json::json;

use super::repository::{
    AuditRecord, EpisodeFilter, MemoryRepository, MergePlan, Reconsolidation, StrengthUpdate,
};
use super::stats::{sqlite_stats, MemoryStats};
use super::types::{
    Candidate, ConversationSummary, EntryKind, EpisodeHit, MemoryAssociation, MemoryEntry,
    Partition,
};
use crate::db::{self, bytes_to_embedding, embedding_to_bytes};
use crate::error::{MemoryError, Result};

/// Column list matching [`entry_from_row`]; queries alias `memory_entries` as `m`.
const ENTRY_COLUMNS: &str = "m.id, m.scope, m.owner_id, m.type, m.content, m.importance, \
     m.strength, m.decay_rate, m.last_accessed_at, m.strength_updated_at, m.access_count, \
     m.source, m.created_at, m.updated_at, m.version";

const ENTRY_COLUMN_COUNT: usize = 15;

const EPISODE_COLUMNS: &str = "c.id, c.owner_id, c.team_id, c.summary, c.topics, c.decisions, \
     c.period_start, c.period_end, c.created_at";

pub struct SqliteRepository {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteRepository {
    /// Open (or create) a file database with a writer and a reader connection.
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let writer = db::open_database(path)?;
        let reader = db::open_reader(path).context("failed to open reader connection")?;
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            path: Some(path.to_path_buf()),
        })
    }

    /// A private in-memory database on a single connection.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self::from_connection(db::open_memory_database()?))
    }

    /// Wrap an already-initialized connection. Reads share it with writes.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            writer: Mutex::new(conn),
            reader: None,
            path: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The writer connection, for maintenance commands that need raw SQL.
    pub fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| MemoryError::Poisoned("sqlite writer"))
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>> {
        match &self.reader {
            Some(reader) => reader
                .lock()
                .map_err(|_| MemoryError::Poisoned("sqlite reader")),
            None => self.connection(),
        }
    }
}

// ── Row mapping ──────────────────────────────────────────────────────────

fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    Ok(MemoryEntry {
        id: row.get(0)?,
        scope: parse_column(row, 1)?,
        owner_id: row.get(2)?,
        memory_type: parse_column(row, 3)?,
        content: row.get(4)?,
        importance: row.get(5)?,
        strength: row.get(6)?,
        decay_rate: row.get(7)?,
        last_accessed_at: row.get(8)?,
        strength_updated_at: row.get(9)?,
        access_count: row.get(10)?,
        source: parse_column(row, 11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        version: row.get(14)?,
    })
}

fn json_list(row: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn episode_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationSummary> {
    Ok(ConversationSummary {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        team_id: row.get(2)?,
        summary: row.get(3)?,
        topics: json_list(row, 4)?,
        decisions: json_list(row, 5)?,
        period_start: row.get(6)?,
        period_end: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn similarity_from_distance(distance: f64) -> f64 {
    (1.0 - distance).clamp(-1.0, 1.0)
}

// ── Shared statements ────────────────────────────────────────────────────

fn upsert_embedding(conn: &Connection, id: &str, kind: EntryKind, embedding: &[f32]) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO embeddings (entry_id, entry_kind, dimensions, vector, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(entry_id, entry_kind) DO UPDATE SET
             dimensions = excluded.dimensions,
             vector = excluded.vector,
             updated_at = excluded.updated_at",
        params![
            id,
            kind.as_str(),
            embedding.len() as i64,
            embedding_to_bytes(embedding),
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

fn write_audit_log(
    conn: &Connection,
    operation: &str,
    memory_id: &str,
    details: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO memory_log (operation, memory_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, memory_id, details.to_string(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn fetch_entry(conn: &Connection, id: &str) -> rusqlite::Result<Option<MemoryEntry>> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM memory_entries m WHERE m.id = ?1"),
        [id],
        entry_from_row,
    )
    .optional()
}

fn version_of(conn: &Connection, id: &str) -> rusqlite::Result<Option<(i64, u32)>> {
    conn.query_row(
        "SELECT version, access_count FROM memory_entries WHERE id = ?1",
        [id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
}

fn delete_entry_rows(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM embeddings WHERE entry_id = ?1 AND entry_kind = 'memory'",
        [id],
    )?;
    // edges go with the entry via ON DELETE CASCADE
    conn.execute("DELETE FROM memory_entries WHERE id = ?1", [id])?;
    Ok(())
}

impl MemoryRepository for SqliteRepository {
    fn insert_entry(&self, entry: &MemoryEntry, embedding: &[f32]) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO memory_entries (id, scope, owner_id, type, content, importance, strength,
                 decay_rate, last_accessed_at, strength_updated_at, access_count, source,
                 created_at, updated_at, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                entry.id,
                entry.scope.as_str(),
                entry.owner_id,
                entry.memory_type.as_str(),
                entry.content,
                entry.importance.clamp(0.0, 1.0),
                entry.strength.clamp(0.0, 1.0),
                entry.decay_rate,
                entry.last_accessed_at,
                entry.strength_updated_at,
                entry.access_count,
                entry.source.as_str(),
                entry.created_at,
                entry.updated_at,
                entry.version,
            ],
        )?;
        upsert_embedding(&tx, &entry.id, EntryKind::Memory, embedding)?;
        write_audit_log(
            &tx,
            "create",
            &entry.id,
            &json!({ "scope": entry.scope, "type": entry.memory_type, "source": entry.source }),
        )?;
        tx.commit()?;
        Ok(())
    }

    fn get_entry(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.reader()?;
        Ok(fetch_entry(&conn, id)?)
    }

    fn get_entries(&self, ids: &[String]) -> Result<Vec<MemoryEntry>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ENTRY_COLUMNS} FROM memory_entries m WHERE m.id = ?1"
        ))?;
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = stmt.query_row([id], entry_from_row).optional()? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    fn list_entries(&self, partition: Option<&Partition>) -> Result<Vec<MemoryEntry>> {
        let conn = self.reader()?;
        let entries = match partition {
            Some(p) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM memory_entries m
                     WHERE m.scope = ?1 AND m.owner_id IS ?2
                     ORDER BY m.created_at, m.rowid"
                ))?;
                let rows = stmt.query_map(params![p.scope.as_str(), p.owner_id], entry_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ENTRY_COLUMNS} FROM memory_entries m ORDER BY m.created_at, m.rowid"
                ))?;
                let rows = stmt.query_map([], entry_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(entries)
    }

    fn list_partitions(&self) -> Result<Vec<Partition>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT scope, owner_id FROM memory_entries ORDER BY scope, owner_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Partition {
                scope: parse_column(row, 0)?,
                owner_id: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn find_nearest(
        &self,
        partition: &Partition,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<Candidate>> {
        if k == 0 || embedding.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ENTRY_COLUMNS}, vec_distance_cosine(e.vector, ?1) AS distance
             FROM memory_entries m
             JOIN embeddings e ON e.entry_id = m.id AND e.entry_kind = 'memory'
             WHERE m.scope = ?2 AND m.owner_id IS ?3 AND e.dimensions = ?4
             ORDER BY distance ASC, m.rowid ASC
             LIMIT ?5"
        ))?;
        let rows = stmt.query_map(
            params![
                embedding_to_bytes(embedding),
                partition.scope.as_str(),
                partition.owner_id,
                embedding.len() as i64,
                i64::try_from(k).unwrap_or(i64::MAX),
            ],
            |row| {
                Ok(Candidate {
                    entry: entry_from_row(row)?,
                    similarity: similarity_from_distance(row.get(ENTRY_COLUMN_COUNT)?),
                })
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn entry_embeddings(&self, partition: &Partition) -> Result<Vec<(MemoryEntry, Vec<f32>)>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}, e.vector
             FROM memory_entries m
             JOIN embeddings e ON e.entry_id = m.id AND e.entry_kind = 'memory'
             WHERE m.scope = ?1 AND m.owner_id IS ?2
             ORDER BY m.rowid"
        ))?;
        let rows = stmt.query_map(params![partition.scope.as_str(), partition.owner_id], |row| {
            let blob: Vec<u8> = row.get(ENTRY_COLUMN_COUNT)?;
            Ok((entry_from_row(row)?, bytes_to_embedding(&blob)))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn reconsolidate(&self, update: &Reconsolidation) -> Result<Option<MemoryEntry>> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let previous: Option<String> = tx
            .query_row(
                "SELECT content FROM memory_entries WHERE id = ?1",
                [&update.id],
                |row| row.get(0),
            )
            .optional()?;
        let changed = tx.execute(
            "UPDATE memory_entries SET
                 content = ?1, importance = ?2, strength = ?3, decay_rate = ?4,
                 access_count = access_count + 1,
                 last_accessed_at = ?5, strength_updated_at = ?5, updated_at = ?5,
                 version = version + 1
             WHERE id = ?6 AND version = ?7",
            params![
                update.content,
                update.importance.clamp(0.0, 1.0),
                update.strength.clamp(0.0, 1.0),
                update.decay_rate,
                update.at,
                update.id,
                update.expected_version,
            ],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        write_audit_log(
            &tx,
            "reconsolidate",
            &update.id,
            &json!({ "previous_content": previous, "similarity": update.similarity }),
        )?;
        let entry = fetch_entry(&tx, &update.id)?;
        tx.commit()?;
        Ok(entry)
    }

    fn replace_embedding(&self, id: &str, kind: EntryKind, embedding: &[f32]) -> Result<()> {
        let conn = self.connection()?;
        let sql = match kind {
            EntryKind::Memory => "SELECT 1 FROM memory_entries WHERE id = ?1",
            EntryKind::Episode => "SELECT 1 FROM conversation_summaries WHERE id = ?1",
        };
        let exists = conn
            .query_row(sql, [id], |_| Ok(()))
            .optional()?
            .is_some();
        if !exists {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        upsert_embedding(&conn, id, kind, embedding)?;
        Ok(())
    }

    fn apply_strength_updates(&self, updates: &[StrengthUpdate]) -> Result<Vec<String>> {
        if updates.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let mut applied = Vec::new();
        {
            let mut stmt = tx.prepare(
                "UPDATE memory_entries SET
                     strength = ?1,
                     strength_updated_at = ?2,
                     version = version + 1
                 WHERE id = ?3 AND version = ?4",
            )?;
            for u in updates {
                let changed = stmt.execute(params![
                    u.strength.clamp(0.0, 1.0),
                    u.at,
                    u.id,
                    u.expected_version,
                ])?;
                if changed > 0 {
                    applied.push(u.id.clone());
                }
            }
        }
        tx.commit()?;
        Ok(applied)
    }

    fn record_recalls(
        &self,
        ids: &[String],
        at: &str,
        reinforce: &dyn Fn(&MemoryEntry) -> f64,
    ) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut recorded = Vec::new();
        for id in ids {
            let Some(entry) = fetch_entry(&tx, id)? else {
                continue;
            };
            tx.execute(
                "UPDATE memory_entries SET
                     strength = ?1,
                     strength_updated_at = ?2,
                     last_accessed_at = ?2,
                     access_count = access_count + 1,
                     version = version + 1
                 WHERE id = ?3",
                params![reinforce(&entry).clamp(0.0, 1.0), at, id],
            )?;
            recorded.push(id.clone());
        }
        tx.commit()?;
        Ok(recorded)
    }

    fn prune_entry(&self, id: &str, expected_version: i64, effective_strength: f64) -> Result<bool> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        if version_of(&tx, id)?.map(|(v, _)| v) != Some(expected_version) {
            return Ok(false);
        }
        delete_entry_rows(&tx, id)?;
        write_audit_log(
            &tx,
            "prune",
            id,
            &json!({ "effective_strength": effective_strength }),
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn merge_entries(&self, plan: &MergePlan) -> Result<bool> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;

        let winner = version_of(&tx, &plan.winner_id)?;
        let loser = version_of(&tx, &plan.loser_id)?;
        let loser_access = match (winner, loser) {
            (Some((wv, _)), Some((lv, access)))
                if wv == plan.winner_version && lv == plan.loser_version =>
            {
                access
            }
            _ => return Ok(false),
        };

        let moved: Vec<(String, f64, String)> = {
            let mut stmt = tx.prepare(
                "SELECT CASE WHEN source_id = ?1 THEN target_id ELSE source_id END, weight, created_at
                 FROM memory_associations
                 WHERE source_id = ?1 OR target_id = ?1",
            )?;
            let rows = stmt.query_map([&plan.loser_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for (other, weight, created_at) in &moved {
            if *other == plan.winner_id {
                continue;
            }
            let (s, t) = MemoryAssociation::canonical(&plan.winner_id, other);
            // existing winner edges take precedence
            tx.execute(
                "INSERT OR IGNORE INTO memory_associations (source_id, target_id, weight, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![s, t, weight, created_at, plan.at],
            )?;
        }

        tx.execute(
            "UPDATE memory_entries SET
                 access_count = access_count + ?1,
                 strength = ?2,
                 strength_updated_at = ?3,
                 updated_at = ?3,
                 version = version + 1
             WHERE id = ?4",
            params![
                loser_access,
                plan.winner_strength.clamp(0.0, 1.0),
                plan.at,
                plan.winner_id
            ],
        )?;
        delete_entry_rows(&tx, &plan.loser_id)?;
        write_audit_log(
            &tx,
            "merge",
            &plan.winner_id,
            &json!({
                "absorbed": plan.loser_id,
                "similarity": plan.similarity,
                "edges_moved": moved.len(),
            }),
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn upsert_association(&self, a: &str, b: &str, weight: f64) -> Result<()> {
        if a == b {
            return Err(MemoryError::InvalidInput(format!("self-association on {a}")));
        }
        let (s, t) = MemoryAssociation::canonical(a, b);
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO memory_associations (source_id, target_id, weight, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(source_id, target_id) DO UPDATE SET
                 updated_at = CASE WHEN excluded.weight > weight THEN excluded.updated_at ELSE updated_at END,
                 weight = MAX(weight, excluded.weight)",
            params![s, t, weight.clamp(0.0, 1.0), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn associations_for(&self, ids: &[String]) -> Result<Vec<MemoryAssociation>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT source_id, target_id, weight, created_at, updated_at
             FROM memory_associations
             WHERE source_id IN ({placeholders}) OR target_id IN ({placeholders})
             ORDER BY source_id, target_id"
        ))?;
        let rows = stmt.query_map(params_from_iter(ids.iter().chain(ids.iter())), |row| {
            Ok(MemoryAssociation {
                source_id: row.get(0)?,
                target_id: row.get(1)?,
                weight: row.get(2)?,
                created_at: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn decay_associations(&self, factor: f64) -> Result<usize> {
        let conn = self.connection()?;
        Ok(conn.execute(
            "UPDATE memory_associations SET weight = weight * ?1",
            [factor.clamp(0.0, 1.0)],
        )?)
    }

    fn delete_orphan_associations(&self) -> Result<usize> {
        let conn = self.connection()?;
        Ok(conn.execute(
            "DELETE FROM memory_associations
             WHERE NOT EXISTS (SELECT 1 FROM memory_entries m WHERE m.id = source_id)
                OR NOT EXISTS (SELECT 1 FROM memory_entries m WHERE m.id = target_id)",
            [],
        )?)
    }

    fn delete_weak_associations(&self, min_weight: f64) -> Result<usize> {
        let conn = self.connection()?;
        Ok(conn.execute(
            "DELETE FROM memory_associations WHERE weight < ?1",
            [min_weight],
        )?)
    }

    fn insert_episode(&self, episode: &ConversationSummary, embedding: &[f32]) -> Result<()> {
        let topics = serde_json::to_string(&episode.topics)?;
        let decisions = serde_json::to_string(&episode.decisions)?;
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO conversation_summaries
                 (id, owner_id, team_id, summary, topics, decisions, period_start, period_end, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                episode.id,
                episode.owner_id,
                episode.team_id,
                episode.summary,
                topics,
                decisions,
                episode.period_start,
                episode.period_end,
                episode.created_at,
            ],
        )?;
        upsert_embedding(&tx, &episode.id, EntryKind::Episode, embedding)?;
        write_audit_log(&tx, "episode", &episode.id, &json!({ "topics": episode.topics }))?;
        tx.commit()?;
        Ok(())
    }

    fn list_episodes(&self) -> Result<Vec<ConversationSummary>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EPISODE_COLUMNS} FROM conversation_summaries c ORDER BY c.period_start, c.rowid"
        ))?;
        let rows = stmt.query_map([], episode_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn find_nearest_episodes(
        &self,
        filter: &EpisodeFilter,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<EpisodeHit>> {
        if k == 0 || embedding.is_empty() {
            return Ok(vec![]);
        }
        let conn = self.reader()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {EPISODE_COLUMNS}, vec_distance_cosine(e.vector, ?1) AS distance
             FROM conversation_summaries c
             JOIN embeddings e ON e.entry_id = c.id AND e.entry_kind = 'episode'
             WHERE e.dimensions = ?2
               AND ((?3 IS NOT NULL AND c.owner_id = ?3) OR (?4 IS NOT NULL AND c.team_id = ?4))
             ORDER BY distance ASC, c.rowid ASC
             LIMIT ?5"
        ))?;
        let rows = stmt.query_map(
            params![
                embedding_to_bytes(embedding),
                embedding.len() as i64,
                filter.owner_id,
                filter.team_id,
                i64::try_from(k).unwrap_or(i64::MAX),
            ],
            |row| {
                Ok(EpisodeHit {
                    episode: episode_from_row(row)?,
                    similarity: similarity_from_distance(row.get(9)?),
                })
            },
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn audit_trail(&self, memory_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT operation, memory_id, details, created_at FROM memory_log
             WHERE memory_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![memory_id, i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
            let details: Option<String> = row.get(2)?;
            Ok(AuditRecord {
                operation: row.get(0)?,
                memory_id: row.get(1)?,
                details: details.and_then(|d| serde_json::from_str(&d).ok()),
                created_at: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn trim_audit_log(&self, before: &str) -> Result<usize> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM memory_log
             WHERE created_at < ?1
               AND memory_id NOT IN (SELECT id FROM memory_entries)
               AND memory_id NOT IN (SELECT id FROM conversation_summaries)",
            [before],
        )?;
        Ok(deleted)
    }

    fn stats(&self) -> Result<MemoryStats> {
        let conn = self.reader()?;
        let mut stats = sqlite_stats(&conn)?;
        stats.db_size_bytes = self
            .path
            .as_deref()
            .and_then(|p| std::fs::metadata(p).ok())
            .map(|m| m.len());
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryType, Scope, Source};

    fn entry(id: &str, partition: &Partition) -> MemoryEntry {
        let now = Utc::now().to_rfc3339();
        MemoryEntry {
            id: id.into(),
            scope: partition.scope,
            owner_id: partition.owner_id.clone(),
            memory_type: MemoryType::Preference,
            content: format!("content of {id}"),
            importance: 0.5,
            strength: 1.0,
            decay_rate: 0.05,
            last_accessed_at: None,
            strength_updated_at: None,
            access_count: 0,
            source: Source::Explicit,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        }
    }

    fn unit(i: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[i] = 1.0;
        v
    }

    #[test]
    fn insert_and_read_back() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let p = Partition::personal("alice");
        let e = entry("a", &p);
        repo.insert_entry(&e, &unit(0)).unwrap();
        assert_eq!(repo.get_entry("a").unwrap(), Some(e));
        assert!(repo.get_entry("missing").unwrap().is_none());
        assert_eq!(repo.audit_trail("a", 5).unwrap()[0].operation, "create");
    }

    #[test]
    fn find_nearest_filters_partition_and_ranks_by_cosine() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let alice = Partition::personal("alice");
        let global = Partition::global();
        repo.insert_entry(&entry("a", &alice), &unit(0)).unwrap();
        repo.insert_entry(&entry("b", &alice), &[0.6, 0.8, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        repo.insert_entry(&entry("g", &global), &unit(0)).unwrap();

        let hits = repo.find_nearest(&alice, &unit(0), 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entry.id, "a");
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        assert!((hits[1].similarity - 0.6).abs() < 1e-5);

        let global_hits = repo.find_nearest(&global, &unit(0), 10).unwrap();
        assert_eq!(global_hits.len(), 1);
        assert_eq!(global_hits[0].entry.id, "g");
    }

    #[test]
    fn upsert_association_never_lowers_weight() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let p = Partition::team("core");
        repo.insert_entry(&entry("a", &p), &unit(0)).unwrap();
        repo.insert_entry(&entry("b", &p), &unit(1)).unwrap();

        repo.upsert_association("b", "a", 0.7).unwrap();
        repo.upsert_association("a", "b", 0.2).unwrap();
        let edges = repo.associations_for(&["b".into()]).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].source_id.as_str(), edges[0].target_id.as_str()), ("a", "b"));
        assert!((edges[0].weight - 0.7).abs() < 1e-9);
        assert!(repo.upsert_association("a", "a", 0.5).is_err());
    }

    #[test]
    fn reconsolidate_is_version_guarded() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let p = Partition::personal("alice");
        repo.insert_entry(&entry("a", &p), &unit(0)).unwrap();

        let update = Reconsolidation {
            id: "a".into(),
            expected_version: 1,
            content: "new content".into(),
            importance: 0.9,
            strength: 1.0,
            decay_rate: 0.02,
            at: Utc::now().to_rfc3339(),
            similarity: 0.97,
        };
        let updated = repo.reconsolidate(&update).unwrap().unwrap();
        assert_eq!(updated.content, "new content");
        assert_eq!(updated.version, 2);
        assert_eq!(updated.access_count, 1);
        assert!(repo.reconsolidate(&update).unwrap().is_none());

        let trail = repo.audit_trail("a", 5).unwrap();
        assert_eq!(trail[0].operation, "reconsolidate");
        assert_eq!(
            trail[0].details.as_ref().unwrap()["previous_content"],
            "content of a"
        );
    }

    #[test]
    fn prune_cascades_edges_and_embedding() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let p = Partition::global();
        repo.insert_entry(&entry("a", &p), &unit(0)).unwrap();
        repo.insert_entry(&entry("b", &p), &unit(1)).unwrap();
        repo.upsert_association("a", "b", 0.5).unwrap();

        assert!(!repo.prune_entry("a", 7, 0.0).unwrap());
        assert!(repo.prune_entry("a", 1, 0.0).unwrap());
        assert!(repo.associations_for(&["b".into()]).unwrap().is_empty());
        let conn = repo.connection().unwrap();
        let embeddings: i64 = conn
            .query_row("SELECT COUNT(*) FROM embeddings WHERE entry_id = 'a'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(embeddings, 0);
    }

    #[test]
    fn merge_repoints_edges_and_transfers_access() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let p = Partition::personal("alice");
        let mut loser = entry("l", &p);
        loser.access_count = 4;
        repo.insert_entry(&entry("w", &p), &unit(0)).unwrap();
        repo.insert_entry(&loser, &unit(0)).unwrap();
        repo.insert_entry(&entry("x", &p), &unit(1)).unwrap();
        repo.insert_entry(&entry("y", &p), &unit(2)).unwrap();
        repo.upsert_association("l", "x", 0.6).unwrap();
        repo.upsert_association("w", "y", 0.4).unwrap();
        repo.upsert_association("l", "y", 0.9).unwrap();
        repo.upsert_association("l", "w", 0.8).unwrap();

        let merged = repo
            .merge_entries(&MergePlan {
                winner_id: "w".into(),
                winner_version: 1,
                loser_id: "l".into(),
                loser_version: 1,
                winner_strength: 1.0,
                similarity: 0.99,
                at: Utc::now().to_rfc3339(),
            })
            .unwrap();
        assert!(merged);

        assert!(repo.get_entry("l").unwrap().is_none());
        let winner = repo.get_entry("w").unwrap().unwrap();
        assert_eq!(winner.access_count, 4);
        assert_eq!(winner.version, 2);

        let edges = repo.associations_for(&["w".into()]).unwrap();
        let mut pairs: Vec<(String, f64)> = edges
            .iter()
            .map(|e| (e.other("w").unwrap().to_string(), e.weight))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        // x moved over; y keeps the winner's own weight
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].0, "x");
        assert!((pairs[0].1 - 0.6).abs() < 1e-9);
        assert_eq!(pairs[1].0, "y");
        assert!((pairs[1].1 - 0.4).abs() < 1e-9);
    }

    #[test]
    fn episodes_round_trip_with_lists() {
        let repo = SqliteRepository::open_in_memory().unwrap();
        let ep = ConversationSummary {
            id: "ep1".into(),
            owner_id: Some("alice".into()),
            team_id: None,
            summary: "Discussed the release".into(),
            topics: vec!["release".into()],
            decisions: vec!["ship monday".into()],
            period_start: "2026-01-01T10:00:00+00:00".into(),
            period_end: "2026-01-01T11:00:00+00:00".into(),
            created_at: Utc::now().to_rfc3339(),
        };
        repo.insert_episode(&ep, &unit(3)).unwrap();
        assert_eq!(repo.list_episodes().unwrap(), vec![ep.clone()]);

        let filter = EpisodeFilter {
            owner_id: Some("alice".into()),
            team_id: None,
        };
        let hits = repo.find_nearest_episodes(&filter, &unit(3), 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].episode, ep);

        let other = EpisodeFilter {
            owner_id: Some("bob".into()),
            team_id: None,
        };
        assert!(repo.find_nearest_episodes(&other, &unit(3), 5).unwrap().is_empty());
    }

    #[test]
    fn file_repository_reports_size() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SqliteRepository::open(dir.path().join("memory.db")).unwrap();
        repo.insert_entry(&entry("a", &Partition::global()), &unit(0)).unwrap();
        let stats = repo.stats().unwrap();
        assert_eq!(stats.total_memories, 1);
        assert!(stats.db_size_bytes.is_some());
    }
}
