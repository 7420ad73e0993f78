//! Persistence contract for the memory engine.
//!
//! [`MemoryRepository`] is the only way the services touch storage. It owns no
//! ranking, decay or linking logic: callers compute new values and the
//! repository applies them, conditionally on the `version` they read, so a
//! concurrent writer is detected instead of overwritten.
//!
//! Two implementations ship: [`SqliteRepository`](super::sqlite::SqliteRepository)
//! and the in-process [`InMemoryRepository`](super::in_memory::InMemoryRepository).

use serde::Serialize;

use super::stats::MemoryStats;
use super::types::{
    Candidate, ConversationSummary, EntryKind, EpisodeHit, MemoryAssociation, MemoryEntry,
    Partition,
};
use crate::error::Result;

/// Field values for an in-place reconsolidation, computed by the store path.
#[derive(Debug, Clone)]
pub struct Reconsolidation {
    pub id: String,
    pub expected_version: i64,
    pub content: String,
    pub importance: f64,
    pub strength: f64,
    pub decay_rate: f64,
    /// Written to `last_accessed_at`, `strength_updated_at` and `updated_at`.
    pub at: String,
    /// Cosine similarity that triggered the merge, kept for the audit trail.
    pub similarity: f64,
}

/// A new strength value for one entry.
#[derive(Debug, Clone)]
pub struct StrengthUpdate {
    pub id: String,
    pub expected_version: i64,
    pub strength: f64,
    /// Written to `strength_updated_at`.
    pub at: String,
}

/// Fold `loser_id` into `winner_id`.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub winner_id: String,
    pub winner_version: i64,
    pub loser_id: String,
    pub loser_version: i64,
    /// Winner strength after absorbing the loser.
    pub winner_strength: f64,
    pub similarity: f64,
    pub at: String,
}

/// Which episodes an episodic search may see: those owned by `owner_id` or
/// belonging to `team_id`.
#[derive(Debug, Clone, Default)]
pub struct EpisodeFilter {
    pub owner_id: Option<String>,
    pub team_id: Option<String>,
}

impl EpisodeFilter {
    pub fn matches(&self, episode: &ConversationSummary) -> bool {
        let owner = matches!((&self.owner_id, &episode.owner_id), (Some(a), Some(b)) if a == b);
        let team = matches!((&self.team_id, &episode.team_id), (Some(a), Some(b)) if a == b);
        owner || team
    }
}

/// One row of the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub operation: String,
    pub memory_id: String,
    pub details: Option<serde_json::Value>,
    pub created_at: String,
}

pub trait MemoryRepository: Send + Sync {
    // ── Entries ──────────────────────────────────────────────────────────

    /// Insert an entry and its embedding atomically.
    fn insert_entry(&self, entry: &MemoryEntry, embedding: &[f32]) -> Result<()>;

    fn get_entry(&self, id: &str) -> Result<Option<MemoryEntry>>;

    /// Fetch entries by id, in the order given. Missing ids are skipped.
    fn get_entries(&self, ids: &[String]) -> Result<Vec<MemoryEntry>>;

    /// All entries (optionally of one partition), oldest first.
    fn list_entries(&self, partition: Option<&Partition>) -> Result<Vec<MemoryEntry>>;

    fn list_partitions(&self) -> Result<Vec<Partition>>;

    /// Top-`k` entries of `partition` by cosine similarity to `embedding`,
    /// most similar first; equal similarities keep insertion order. Entries
    /// without a same-width embedding are not candidates.
    fn find_nearest(&self, partition: &Partition, embedding: &[f32], k: usize)
        -> Result<Vec<Candidate>>;

    /// Every entry of `partition` that has an embedding, with its vector.
    fn entry_embeddings(&self, partition: &Partition) -> Result<Vec<(MemoryEntry, Vec<f32>)>>;

    /// Apply `update` if the entry still has `expected_version`. Bumps
    /// `access_count` and `version`. `Ok(None)` means the entry changed or vanished.
    fn reconsolidate(&self, update: &Reconsolidation) -> Result<Option<MemoryEntry>>;

    fn replace_embedding(&self, id: &str, kind: EntryKind, embedding: &[f32]) -> Result<()>;

    /// Apply each update whose version still matches. Returns the ids applied.
    fn apply_strength_updates(&self, updates: &[StrengthUpdate]) -> Result<Vec<String>>;

    /// Record one recall per id as a single read-modify-write: the current row
    /// is read under the write lock, its strength set to `reinforce(entry)`,
    /// `access_count` and `version` bumped and `last_accessed_at` set to `at`.
    /// Missing ids are skipped. Returns the ids recorded.
    fn record_recalls(
        &self,
        ids: &[String],
        at: &str,
        reinforce: &dyn Fn(&MemoryEntry) -> f64,
    ) -> Result<Vec<String>>;

    /// Delete an entry (with its embedding and edges) if it still has `expected_version`.
    fn prune_entry(&self, id: &str, expected_version: i64, effective_strength: f64) -> Result<bool>;

    /// Re-point the loser's edges to the winner (existing winner edges win),
    /// add the loser's access count to the winner, set the winner's strength
    /// and delete the loser, all atomically. `Ok(false)` if either side changed.
    fn merge_entries(&self, plan: &MergePlan) -> Result<bool>;

    // ── Associations ─────────────────────────────────────────────────────

    /// Create the `a`–`b` edge or raise its weight to `weight`. Never lowers it.
    fn upsert_association(&self, a: &str, b: &str, weight: f64) -> Result<()>;

    /// Every edge with at least one endpoint in `ids`.
    fn associations_for(&self, ids: &[String]) -> Result<Vec<MemoryAssociation>>;

    /// Multiply every edge weight by `factor`. Returns edges touched.
    fn decay_associations(&self, factor: f64) -> Result<usize>;

    fn delete_orphan_associations(&self) -> Result<usize>;

    fn delete_weak_associations(&self, min_weight: f64) -> Result<usize>;

    // ── Episodes ─────────────────────────────────────────────────────────

    fn insert_episode(&self, episode: &ConversationSummary, embedding: &[f32]) -> Result<()>;

    fn list_episodes(&self) -> Result<Vec<ConversationSummary>>;

    fn find_nearest_episodes(
        &self,
        filter: &EpisodeFilter,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<EpisodeHit>>;

    // ── Introspection ────────────────────────────────────────────────────

    /// Most recent audit records for one memory, newest first.
    fn audit_trail(&self, memory_id: &str, limit: usize) -> Result<Vec<AuditRecord>>;

    /// Delete audit records written before `before` whose memory or episode
    /// no longer exists. History of live records is kept. Returns rows deleted.
    fn trim_audit_log(&self, before: &str) -> Result<usize>;

    fn stats(&self) -> Result<MemoryStats>;
}
