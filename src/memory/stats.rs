use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeMap;

use super::types::MemoryEntry;

/// Store-wide counts, as reported by `memory_stats` and `mnemos stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_memories: u64,
    pub by_scope: BTreeMap<String, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub by_source: BTreeMap<String, u64>,
    pub associations: u64,
    pub episodes: u64,
    /// Mean stored strength (as of each entry's last recompute).
    pub average_strength: f64,
    pub average_importance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_size_bytes: Option<u64>,
}

impl MemoryStats {
    /// Summarize an in-process list of entries.
    pub fn from_entries(entries: &[MemoryEntry], associations: u64, episodes: u64) -> Self {
        let mut stats = MemoryStats {
            total_memories: entries.len() as u64,
            associations,
            episodes,
            ..Default::default()
        };
        for e in entries {
            *stats.by_scope.entry(e.scope.to_string()).or_default() += 1;
            *stats.by_type.entry(e.memory_type.to_string()).or_default() += 1;
            *stats.by_source.entry(e.source.to_string()).or_default() += 1;
        }
        if !entries.is_empty() {
            let n = entries.len() as f64;
            stats.average_strength = entries.iter().map(|e| e.strength).sum::<f64>() / n;
            stats.average_importance = entries.iter().map(|e| e.importance).sum::<f64>() / n;
        }
        stats.oldest_memory = entries.iter().map(|e| e.created_at.clone()).min();
        stats.newest_memory = entries.iter().map(|e| e.created_at.clone()).max();
        stats
    }
}

/// Compute statistics with SQL aggregates.
pub(crate) fn sqlite_stats(conn: &Connection) -> rusqlite::Result<MemoryStats> {
    let (total, average_strength, average_importance, oldest, newest): (
        i64,
        Option<f64>,
        Option<f64>,
        Option<String>,
        Option<String>,
    ) = conn.query_row(
        "SELECT COUNT(*), AVG(strength), AVG(importance), MIN(created_at), MAX(created_at)
         FROM memory_entries",
        [],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
    )?;

    Ok(MemoryStats {
        total_memories: total as u64,
        by_scope: count_grouped(conn, "scope")?,
        by_type: count_grouped(conn, "type")?,
        by_source: count_grouped(conn, "source")?,
        associations: count_rows(conn, "memory_associations")?,
        episodes: count_rows(conn, "conversation_summaries")?,
        average_strength: average_strength.unwrap_or(0.0),
        average_importance: average_importance.unwrap_or(0.0),
        oldest_memory: oldest,
        newest_memory: newest,
        db_size_bytes: None,
    })
}

/// `column` is always one of our own column names, never user input.
fn count_grouped(conn: &Connection, column: &str) -> rusqlite::Result<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM memory_entries GROUP BY {column}"
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
    })?;
    rows.collect()
}

fn count_rows(conn: &Connection, table: &str) -> rusqlite::Result<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(n as u64)
}
