//! In-process [`MemoryRepository`] backed by plain collections behind an `RwLock`.
//!
//! Semantics mirror the SQLite repository: conditional writes check `version`,
//! deleting an entry removes its embedding and edges, and nearest-neighbor
//! ties keep insertion order. Used by unit tests and by embedders that don't
//! need persistence.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;

use super::repository::{
    AuditRecord, EpisodeFilter, MemoryRepository, MergePlan, Reconsolidation, StrengthUpdate,
};
use super::stats::MemoryStats;
use super::types::{
    Candidate, ConversationSummary, EntryKind, EpisodeHit, MemoryAssociation, MemoryEntry,
    Partition,
};
use crate::embedding::cosine_similarity;
use crate::error::{MemoryError, Result};

#[derive(Default)]
struct State {
    /// Insertion order doubles as the tie-break order for similarity search.
    entries: Vec<MemoryEntry>,
    embeddings: HashMap<(String, EntryKind), Vec<f32>>,
    associations: BTreeMap<(String, String), MemoryAssociation>,
    episodes: Vec<ConversationSummary>,
    audit: Vec<AuditRecord>,
}

impl State {
    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn entry(&self, id: &str) -> Option<&MemoryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut MemoryEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    fn version_is(&self, id: &str, version: i64) -> bool {
        self.entry(id).is_some_and(|e| e.version == version)
    }

    fn remove_entry(&mut self, id: &str) {
        if let Some(pos) = self.position(id) {
            self.entries.remove(pos);
        }
        self.embeddings.remove(&(id.to_string(), EntryKind::Memory));
        self.associations
            .retain(|(s, t), _| s.as_str() != id && t.as_str() != id);
    }

    fn log(&mut self, operation: &str, memory_id: &str, details: serde_json::Value) {
        self.audit.push(AuditRecord {
            operation: operation.into(),
            memory_id: memory_id.into(),
            details: Some(details),
            created_at: Utc::now().to_rfc3339(),
        });
    }
}

#[derive(Default)]
pub struct InMemoryRepository {
    state: RwLock<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| MemoryError::Poisoned("memory state"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| MemoryError::Poisoned("memory state"))
    }
}

fn sort_by_similarity<T>(hits: &mut [T], similarity: impl Fn(&T) -> f64) {
    // stable: equal similarities keep insertion order
    hits.sort_by(|a, b| similarity(b).total_cmp(&similarity(a)));
}

impl MemoryRepository for InMemoryRepository {
    fn insert_entry(&self, entry: &MemoryEntry, embedding: &[f32]) -> Result<()> {
        let mut state = self.write()?;
        if state.position(&entry.id).is_some() {
            return Err(MemoryError::InvalidInput(format!("duplicate id {}", entry.id)));
        }
        state.entries.push(entry.clone());
        state
            .embeddings
            .insert((entry.id.clone(), EntryKind::Memory), embedding.to_vec());
        state.log(
            "create",
            &entry.id,
            serde_json::json!({ "scope": entry.scope, "type": entry.memory_type }),
        );
        Ok(())
    }

    fn get_entry(&self, id: &str) -> Result<Option<MemoryEntry>> {
        Ok(self.read()?.entry(id).cloned())
    }

    fn get_entries(&self, ids: &[String]) -> Result<Vec<MemoryEntry>> {
        let state = self.read()?;
        Ok(ids.iter().filter_map(|id| state.entry(id).cloned()).collect())
    }

    fn list_entries(&self, partition: Option<&Partition>) -> Result<Vec<MemoryEntry>> {
        let state = self.read()?;
        let mut entries: Vec<MemoryEntry> = state
            .entries
            .iter()
            .filter(|e| partition.map_or(true, |p| e.partition() == *p))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }

    fn list_partitions(&self) -> Result<Vec<Partition>> {
        let state = self.read()?;
        let mut seen = HashSet::new();
        Ok(state
            .entries
            .iter()
            .map(MemoryEntry::partition)
            .filter(|p| seen.insert(p.clone()))
            .collect())
    }

    fn find_nearest(
        &self,
        partition: &Partition,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<Candidate>> {
        let state = self.read()?;
        let mut hits: Vec<Candidate> = state
            .entries
            .iter()
            .filter(|e| e.partition() == *partition)
            .filter_map(|e| {
                let v = state.embeddings.get(&(e.id.clone(), EntryKind::Memory))?;
                (v.len() == embedding.len()).then(|| Candidate {
                    entry: e.clone(),
                    similarity: cosine_similarity(v, embedding),
                })
            })
            .collect();
        sort_by_similarity(&mut hits, |c| c.similarity);
        hits.truncate(k);
        Ok(hits)
    }

    fn entry_embeddings(&self, partition: &Partition) -> Result<Vec<(MemoryEntry, Vec<f32>)>> {
        let state = self.read()?;
        Ok(state
            .entries
            .iter()
            .filter(|e| e.partition() == *partition)
            .filter_map(|e| {
                let v = state.embeddings.get(&(e.id.clone(), EntryKind::Memory))?;
                Some((e.clone(), v.clone()))
            })
            .collect())
    }

    fn reconsolidate(&self, update: &Reconsolidation) -> Result<Option<MemoryEntry>> {
        let mut state = self.write()?;
        let Some(entry) = state.entry_mut(&update.id) else {
            return Ok(None);
        };
        if entry.version != update.expected_version {
            return Ok(None);
        }
        let previous = std::mem::replace(&mut entry.content, update.content.clone());
        entry.importance = update.importance.clamp(0.0, 1.0);
        entry.strength = update.strength.clamp(0.0, 1.0);
        entry.decay_rate = update.decay_rate;
        entry.access_count += 1;
        entry.last_accessed_at = Some(update.at.clone());
        entry.strength_updated_at = Some(update.at.clone());
        entry.updated_at = update.at.clone();
        entry.version += 1;
        let updated = entry.clone();
        state.log(
            "reconsolidate",
            &update.id,
            serde_json::json!({ "previous_content": previous, "similarity": update.similarity }),
        );
        Ok(Some(updated))
    }

    fn replace_embedding(&self, id: &str, kind: EntryKind, embedding: &[f32]) -> Result<()> {
        let mut state = self.write()?;
        let exists = match kind {
            EntryKind::Memory => state.position(id).is_some(),
            EntryKind::Episode => state.episodes.iter().any(|e| e.id == id),
        };
        if !exists {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        state.embeddings.insert((id.to_string(), kind), embedding.to_vec());
        Ok(())
    }

    fn apply_strength_updates(&self, updates: &[StrengthUpdate]) -> Result<Vec<String>> {
        let mut state = self.write()?;
        let mut applied = Vec::new();
        for u in updates {
            let Some(entry) = state.entry_mut(&u.id) else {
                continue;
            };
            if entry.version != u.expected_version {
                continue;
            }
            entry.strength = u.strength.clamp(0.0, 1.0);
            entry.strength_updated_at = Some(u.at.clone());
            entry.version += 1;
            applied.push(u.id.clone());
        }
        Ok(applied)
    }

    fn record_recalls(
        &self,
        ids: &[String],
        at: &str,
        reinforce: &dyn Fn(&MemoryEntry) -> f64,
    ) -> Result<Vec<String>> {
        let mut state = self.write()?;
        let mut recorded = Vec::new();
        for id in ids {
            let Some(entry) = state.entry_mut(id) else {
                continue;
            };
            let strength = reinforce(entry).clamp(0.0, 1.0);
            entry.strength = strength;
            entry.strength_updated_at = Some(at.to_string());
            entry.last_accessed_at = Some(at.to_string());
            entry.access_count += 1;
            entry.version += 1;
            recorded.push(id.clone());
        }
        Ok(recorded)
    }

    fn prune_entry(&self, id: &str, expected_version: i64, effective_strength: f64) -> Result<bool> {
        let mut state = self.write()?;
        if !state.version_is(id, expected_version) {
            return Ok(false);
        }
        state.remove_entry(id);
        state.log("prune", id, serde_json::json!({ "effective_strength": effective_strength }));
        Ok(true)
    }

    fn merge_entries(&self, plan: &MergePlan) -> Result<bool> {
        let mut state = self.write()?;
        if !state.version_is(&plan.winner_id, plan.winner_version)
            || !state.version_is(&plan.loser_id, plan.loser_version)
        {
            return Ok(false);
        }
        let loser_access = state.entry(&plan.loser_id).map_or(0, |e| e.access_count);

        let moved: Vec<MemoryAssociation> = state
            .associations
            .values()
            .filter(|a| a.other(&plan.loser_id).is_some())
            .cloned()
            .collect();
        for edge in moved {
            let Some(other) = edge.other(&plan.loser_id).map(str::to_string) else {
                continue;
            };
            if other == plan.winner_id {
                continue;
            }
            let (s, t) = MemoryAssociation::canonical(&plan.winner_id, &other);
            let key = (s.to_string(), t.to_string());
            state.associations.entry(key).or_insert(MemoryAssociation {
                source_id: s.to_string(),
                target_id: t.to_string(),
                weight: edge.weight,
                created_at: edge.created_at.clone(),
                updated_at: plan.at.clone(),
            });
        }

        if let Some(winner) = state.entry_mut(&plan.winner_id) {
            winner.access_count += loser_access;
            winner.strength = plan.winner_strength.clamp(0.0, 1.0);
            winner.strength_updated_at = Some(plan.at.clone());
            winner.updated_at = plan.at.clone();
            winner.version += 1;
        }
        state.remove_entry(&plan.loser_id);
        state.log(
            "merge",
            &plan.winner_id,
            serde_json::json!({ "absorbed": plan.loser_id, "similarity": plan.similarity }),
        );
        Ok(true)
    }

    fn upsert_association(&self, a: &str, b: &str, weight: f64) -> Result<()> {
        if a == b {
            return Err(MemoryError::InvalidInput(format!("self-association on {a}")));
        }
        let mut state = self.write()?;
        for id in [a, b] {
            if state.position(id).is_none() {
                return Err(MemoryError::NotFound(id.to_string()));
            }
        }
        let (s, t) = MemoryAssociation::canonical(a, b);
        let now = Utc::now().to_rfc3339();
        let weight = weight.clamp(0.0, 1.0);
        state
            .associations
            .entry((s.to_string(), t.to_string()))
            .and_modify(|edge| {
                if weight > edge.weight {
                    edge.weight = weight;
                    edge.updated_at = now.clone();
                }
            })
            .or_insert_with(|| MemoryAssociation {
                source_id: s.to_string(),
                target_id: t.to_string(),
                weight,
                created_at: now.clone(),
                updated_at: now.clone(),
            });
        Ok(())
    }

    fn associations_for(&self, ids: &[String]) -> Result<Vec<MemoryAssociation>> {
        let wanted: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let state = self.read()?;
        Ok(state
            .associations
            .values()
            .filter(|a| wanted.contains(a.source_id.as_str()) || wanted.contains(a.target_id.as_str()))
            .cloned()
            .collect())
    }

    fn decay_associations(&self, factor: f64) -> Result<usize> {
        let mut state = self.write()?;
        let factor = factor.clamp(0.0, 1.0);
        for edge in state.associations.values_mut() {
            edge.weight *= factor;
        }
        Ok(state.associations.len())
    }

    fn delete_orphan_associations(&self) -> Result<usize> {
        let mut state = self.write()?;
        let live: HashSet<String> = state.entries.iter().map(|e| e.id.clone()).collect();
        let before = state.associations.len();
        state
            .associations
            .retain(|(s, t), _| live.contains(s) && live.contains(t));
        Ok(before - state.associations.len())
    }

    fn delete_weak_associations(&self, min_weight: f64) -> Result<usize> {
        let mut state = self.write()?;
        let before = state.associations.len();
        state.associations.retain(|_, a| a.weight >= min_weight);
        Ok(before - state.associations.len())
    }

    fn insert_episode(&self, episode: &ConversationSummary, embedding: &[f32]) -> Result<()> {
        let mut state = self.write()?;
        state.episodes.push(episode.clone());
        state
            .embeddings
            .insert((episode.id.clone(), EntryKind::Episode), embedding.to_vec());
        state.log("episode", &episode.id, serde_json::json!({ "topics": episode.topics }));
        Ok(())
    }

    fn list_episodes(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.read()?.episodes.clone())
    }

    fn find_nearest_episodes(
        &self,
        filter: &EpisodeFilter,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<EpisodeHit>> {
        let state = self.read()?;
        let mut hits: Vec<EpisodeHit> = state
            .episodes
            .iter()
            .filter(|e| filter.matches(e))
            .filter_map(|e| {
                let v = state.embeddings.get(&(e.id.clone(), EntryKind::Episode))?;
                (v.len() == embedding.len()).then(|| EpisodeHit {
                    episode: e.clone(),
                    similarity: cosine_similarity(v, embedding),
                })
            })
            .collect();
        sort_by_similarity(&mut hits, |h| h.similarity);
        hits.truncate(k);
        Ok(hits)
    }

    fn audit_trail(&self, memory_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        let state = self.read()?;
        Ok(state
            .audit
            .iter()
            .rev()
            .filter(|r| r.memory_id == memory_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn trim_audit_log(&self, before: &str) -> Result<usize> {
        let mut state = self.write()?;
        let live: HashSet<String> = state
            .entries
            .iter()
            .map(|e| e.id.clone())
            .chain(state.episodes.iter().map(|e| e.id.clone()))
            .collect();
        let total = state.audit.len();
        state
            .audit
            .retain(|r| r.created_at.as_str() >= before || live.contains(&r.memory_id));
        Ok(total - state.audit.len())
    }

    fn stats(&self) -> Result<MemoryStats> {
        let state = self.read()?;
        Ok(MemoryStats::from_entries(
            &state.entries,
            state.associations.len() as u64,
            state.episodes.len() as u64,
        ))
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
            memory_type: MemoryType::Fact,
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

    #[test]
    fn find_nearest_respects_partition_and_order() {
        let repo = InMemoryRepository::new();
        let alice = Partition::personal("alice");
        let bob = Partition::personal("bob");
        repo.insert_entry(&entry("a", &alice), &[1.0, 0.0]).unwrap();
        repo.insert_entry(&entry("b", &alice), &[0.6, 0.8]).unwrap();
        repo.insert_entry(&entry("c", &bob), &[1.0, 0.0]).unwrap();
        repo.insert_entry(&entry("d", &alice), &[1.0, 0.0]).unwrap();

        let hits = repo.find_nearest(&alice, &[1.0, 0.0], 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.entry.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d", "b"]);
    }

    #[test]
    fn find_nearest_skips_mismatched_dimensions() {
        let repo = InMemoryRepository::new();
        let p = Partition::global();
        repo.insert_entry(&entry("a", &p), &[1.0, 0.0, 0.0]).unwrap();
        assert!(repo.find_nearest(&p, &[1.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn upsert_association_keeps_max_weight_and_is_symmetric() {
        let repo = InMemoryRepository::new();
        let p = Partition::global();
        repo.insert_entry(&entry("a", &p), &[1.0]).unwrap();
        repo.insert_entry(&entry("b", &p), &[1.0]).unwrap();

        repo.upsert_association("b", "a", 0.6).unwrap();
        repo.upsert_association("a", "b", 0.4).unwrap();
        repo.upsert_association("a", "b", 0.9).unwrap();

        let from_a = repo.associations_for(&["a".into()]).unwrap();
        let from_b = repo.associations_for(&["b".into()]).unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a, from_b);
        assert_eq!(from_a[0].source_id, "a");
        assert!((from_a[0].weight - 0.9).abs() < 1e-9);
    }

    #[test]
    fn conditional_writes_reject_stale_versions() {
        let repo = InMemoryRepository::new();
        let p = Partition::global();
        repo.insert_entry(&entry("a", &p), &[1.0]).unwrap();

        let update = StrengthUpdate {
            id: "a".into(),
            expected_version: 1,
            strength: 0.5,
            at: Utc::now().to_rfc3339(),
        };
        assert_eq!(repo.apply_strength_updates(&[update.clone()]).unwrap(), vec!["a"]);
        // version is now 2
        assert!(repo.apply_strength_updates(&[update]).unwrap().is_empty());
        assert!(!repo.prune_entry("a", 1, 0.0).unwrap());
        assert!(repo.prune_entry("a", 2, 0.0).unwrap());
        assert!(repo.get_entry("a").unwrap().is_none());
    }

    #[test]
    fn prune_removes_edges_and_logs() {
        let repo = InMemoryRepository::new();
        let p = Partition::global();
        repo.insert_entry(&entry("a", &p), &[1.0]).unwrap();
        repo.insert_entry(&entry("b", &p), &[1.0]).unwrap();
        repo.upsert_association("a", "b", 0.5).unwrap();

        assert!(repo.prune_entry("a", 1, 0.01).unwrap());
        assert!(repo.associations_for(&["b".into()]).unwrap().is_empty());
        let trail = repo.audit_trail("a", 10).unwrap();
        assert_eq!(trail[0].operation, "prune");
        assert_eq!(trail[1].operation, "create");
    }
}
