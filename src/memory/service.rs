//! The memory service: one explicitly constructed object that owns the
//! repository, the embedding provider and the tuning knobs.
//!
//! The write path lives in [`store`](super::store), the read paths in
//! [`search`](super::search), [`activation`](super::activation) and
//! [`episodic`](super::episodic); they are all `impl MemoryService` blocks.
//! Construct once at startup, share behind an `Arc`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;

use super::decay::DecayModel;
use super::repository::{AuditRecord, MemoryRepository};
use super::types::{MemoryEntry, Partition};
use crate::config::{MnemosConfig, RetrievalConfig, StoreConfig};
use crate::embedding::EmbeddingProvider;
use crate::error::{MemoryError, Result};

/// Audit records shown by `inspect`.
const INSPECT_AUDIT_LIMIT: usize = 20;

pub struct MemoryService {
    pub(crate) repo: Arc<dyn MemoryRepository>,
    pub(crate) embedder: Arc<dyn EmbeddingProvider>,
    pub(crate) decay: DecayModel,
    pub(crate) retrieval: RetrievalConfig,
    pub(crate) store_config: StoreConfig,
    /// Serializes find-then-write sequences per partition within this process.
    partition_locks: Mutex<HashMap<Partition, Arc<Mutex<()>>>>,
}

/// A memory with its live scores, edges and history.
#[derive(Debug, Serialize)]
pub struct MemoryInspection {
    pub entry: MemoryEntry,
    pub effective_strength: f64,
    pub recency: f64,
    pub frequency: f64,
    pub associations: Vec<AssociatedMemory>,
    pub audit: Vec<AuditRecord>,
}

#[derive(Debug, Serialize)]
pub struct AssociatedMemory {
    pub id: String,
    pub content: String,
    pub weight: f64,
}

impl MemoryService {
    pub fn new(
        repo: Arc<dyn MemoryRepository>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &MnemosConfig,
    ) -> Self {
        Self {
            repo,
            embedder,
            decay: DecayModel::new(config.decay.clone()),
            retrieval: config.retrieval.clone(),
            store_config: config.store.clone(),
            partition_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<dyn MemoryRepository> {
        &self.repo
    }

    pub fn decay_model(&self) -> &DecayModel {
        &self.decay
    }

    pub fn retrieval_config(&self) -> &RetrievalConfig {
        &self.retrieval
    }

    pub(crate) fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embedder.embed(text).map_err(MemoryError::embedding)
    }

    /// The write lock for `partition`. Locks nobody else holds are dropped
    /// from the table on every call, so it only tracks partitions in use.
    pub(crate) fn partition_lock(&self, partition: &Partition) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .partition_locks
            .lock()
            .map_err(|_| MemoryError::Poisoned("partition locks"))?;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(locks.entry(partition.clone()).or_default().clone())
    }

    /// Reinforce recalled entries. Duplicate and vanished ids are tolerated.
    pub fn on_batch_recall(&self, ids: &[String]) -> Result<usize> {
        self.decay.on_batch_recall(self.repo.as_ref(), ids, Utc::now())
    }

    /// Look up one memory with its current scores, neighbors and audit trail.
    pub fn inspect(&self, id: &str) -> Result<MemoryInspection> {
        let entry = self
            .repo
            .get_entry(id)?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;
        let now = Utc::now();

        let edges = self.repo.associations_for(&[entry.id.clone()])?;
        let neighbor_ids: Vec<String> = edges
            .iter()
            .filter_map(|e| e.other(&entry.id).map(str::to_string))
            .collect();
        let neighbors: HashMap<String, MemoryEntry> = self
            .repo
            .get_entries(&neighbor_ids)?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        let mut associations: Vec<AssociatedMemory> = edges
            .iter()
            .filter_map(|edge| {
                let other = neighbors.get(edge.other(&entry.id)?)?;
                Some(AssociatedMemory {
                    id: other.id.clone(),
                    content: other.content.clone(),
                    weight: edge.weight,
                })
            })
            .collect();
        associations.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        Ok(MemoryInspection {
            effective_strength: self.decay.effective_strength(&entry, now),
            recency: self.decay.recency_score(&entry, now),
            frequency: self.decay.frequency_score(&entry),
            audit: self.repo.audit_trail(&entry.id, INSPECT_AUDIT_LIMIT)?,
            associations,
            entry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::testing::{axis, fixture, tilted};
    use crate::memory::types::{MemoryType, NewMemory};

    #[test]
    fn inspect_shows_scores_neighbors_and_history() {
        let f = fixture();
        f.embedder.pin("Prefers TypeScript", &axis(0));
        f.embedder.pin("Dislikes untyped JS", &tilted(0, 1, 0.85));
        let alice = Partition::personal("alice");

        let ts = f
            .service
            .store(NewMemory::new(alice.clone(), MemoryType::Preference, "Prefers TypeScript"))
            .unwrap();
        let js = f
            .service
            .store(NewMemory::new(alice.clone(), MemoryType::Preference, "Dislikes untyped JS"))
            .unwrap();
        f.service
            .store(NewMemory::new(alice, MemoryType::Preference, "Prefers TypeScript"))
            .unwrap();

        let view = f.service.inspect(&ts.entry.id).unwrap();
        assert_eq!(view.entry.access_count, 1);
        assert!(view.effective_strength > 0.99);
        assert!(view.recency > 0.99);
        assert_eq!(view.associations.len(), 1);
        assert_eq!(view.associations[0].id, js.entry.id);
        let ops: Vec<&str> = view.audit.iter().map(|r| r.operation.as_str()).collect();
        assert!(ops.contains(&"create"));
        assert!(ops.contains(&"reconsolidate"));
    }

    #[test]
    fn inspect_unknown_id_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.service.inspect("nope"),
            Err(MemoryError::NotFound(_))
        ));
    }

    #[test]
    fn batch_recall_tolerates_duplicates_and_missing_ids() {
        let f = fixture();
        let stored = f
            .service
            .store(NewMemory::new(Partition::global(), MemoryType::Fact, "Water boils at 100C"))
            .unwrap();
        let id = stored.entry.id.clone();
        let touched = f
            .service
            .on_batch_recall(&[id.clone(), id.clone(), "missing".into()])
            .unwrap();
        assert_eq!(touched, 1);
        assert_eq!(f.repo.get_entry(&id).unwrap().unwrap().access_count, 1);
    }

    #[test]
    fn partition_locks_are_shared_per_partition() {
        let f = fixture();
        let a = f.service.partition_lock(&Partition::personal("alice")).unwrap();
        let b = f.service.partition_lock(&Partition::personal("alice")).unwrap();
        let c = f.service.partition_lock(&Partition::global()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn idle_partition_locks_are_released() {
        let f = fixture();
        for i in 0..200 {
            f.service
                .store(NewMemory::new(
                    Partition::personal(format!("user-{i}")),
                    MemoryType::Fact,
                    "Works remotely",
                ))
                .unwrap();
        }
        assert!(f.service.partition_locks.lock().unwrap().len() <= 1);

        // a lock still held survives cleanup and stays shared
        let held = f.service.partition_lock(&Partition::global()).unwrap();
        let other = f.service.partition_lock(&Partition::personal("bob")).unwrap();
        drop(other);
        let again = f.service.partition_lock(&Partition::global()).unwrap();
        assert!(Arc::ptr_eq(&held, &again));
        assert_eq!(f.service.partition_locks.lock().unwrap().len(), 1);
    }
}
