//! Write path: embed, reconsolidate-or-create, auto-link.
//!
//! [`MemoryService::store`] is the single entry point. The embedding is
//! computed before any lock is taken; the find-then-write sequence runs under
//! the partition's in-process guard and every update is conditional on the
//! version that was read, so concurrent near-identical stores converge on one
//! entry instead of racing into duplicates.

use chrono::Utc;
use tracing::{debug, info};

use super::outcome::{AuxOutcome, StoreAction, StoreOutcome};
use super::repository::Reconsolidation;
use super::service::MemoryService;
use super::types::{Candidate, EntryKind, MemoryEntry, NewMemory, Partition};
use crate::error::{MemoryError, Result};

/// Edge weight for a pair whose similarity clears `threshold`: `floor` at the
/// threshold, rising linearly to 1.0 at identical vectors.
pub fn link_weight(similarity: f64, threshold: f64, floor: f64) -> f64 {
    let span = (1.0 - threshold).max(f64::EPSILON);
    (floor + (1.0 - floor) * (similarity - threshold) / span).clamp(0.0, 1.0)
}

fn validate(new: &NewMemory) -> Result<Partition> {
    if new.content.trim().is_empty() {
        return Err(MemoryError::InvalidInput("content must not be empty".into()));
    }
    if !(0.0..=1.0).contains(&new.importance) {
        return Err(MemoryError::InvalidInput(format!(
            "importance must be in [0, 1], got {}",
            new.importance
        )));
    }
    if let Some(rate) = new.decay_rate {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(MemoryError::InvalidInput(format!(
                "decay_rate must be positive, got {rate}"
            )));
        }
    }
    Partition::new(new.partition.scope, new.partition.owner_id.clone())
}

impl MemoryService {
    /// Store `new`, merging it into an existing near-duplicate in the same
    /// partition when one exists.
    pub fn store(&self, new: NewMemory) -> Result<StoreOutcome> {
        let partition = validate(&new)?;
        let requested_rate = new
            .decay_rate
            .unwrap_or(self.store_config.default_decay_rate);

        // 1. Embed outside any lock
        let embedding = self.embed(&new.content)?;

        // 2. Serialize find-then-write for this partition
        let lock = self.partition_lock(&partition)?;
        let _guard = lock
            .lock()
            .map_err(|_| MemoryError::Poisoned("partition write guard"))?;

        // 3. Nearest neighbor decides between reconsolidate and create
        let mut attempts = 0;
        loop {
            let nearest = self
                .repo
                .find_nearest(&partition, &embedding, 1)?
                .into_iter()
                .next();

            let Some(existing) = nearest
                .filter(|c| c.similarity >= self.store_config.reconsolidation_threshold)
            else {
                return self.create(&new, partition, requested_rate, &embedding);
            };

            if let Some(outcome) = self.reconsolidate(&new, &existing, requested_rate, &embedding)? {
                return Ok(outcome);
            }

            attempts += 1;
            if attempts >= self.store_config.max_write_retries {
                return Err(MemoryError::Conflict(format!(
                    "entry {} kept changing during reconsolidation",
                    existing.entry.id
                )));
            }
            debug!(id = %existing.entry.id, attempts, "reconsolidation lost a race, retrying");
        }
    }

    /// `Ok(None)` when the entry changed or vanished since it was read.
    fn reconsolidate(
        &self,
        new: &NewMemory,
        existing: &Candidate,
        requested_rate: f64,
        embedding: &[f32],
    ) -> Result<Option<StoreOutcome>> {
        let old = &existing.entry;
        let update = Reconsolidation {
            id: old.id.clone(),
            expected_version: old.version,
            content: new.content.clone(),
            importance: old.importance.max(new.importance),
            strength: 1.0,
            decay_rate: old.decay_rate.min(requested_rate),
            at: Utc::now().to_rfc3339(),
            similarity: existing.similarity,
        };
        let Some(entry) = self.repo.reconsolidate(&update)? else {
            return Ok(None);
        };

        let reembedding = AuxOutcome::from_result(
            "reembedding",
            self.repo
                .replace_embedding(&entry.id, EntryKind::Memory, embedding)
                .map(|_| 1),
        );

        info!(
            id = %entry.id,
            partition = %entry.partition(),
            similarity = existing.similarity,
            "memory reconsolidated"
        );
        Ok(Some(StoreOutcome {
            action: StoreAction::Reconsolidated {
                previous_content: old.content.clone(),
                similarity: existing.similarity,
            },
            linking: AuxOutcome::skipped("existing entry reconsolidated"),
            reembedding,
            entry,
        }))
    }

    fn create(
        &self,
        new: &NewMemory,
        partition: Partition,
        decay_rate: f64,
        embedding: &[f32],
    ) -> Result<StoreOutcome> {
        let now = Utc::now().to_rfc3339();
        let entry = MemoryEntry {
            id: uuid::Uuid::now_v7().to_string(),
            scope: partition.scope,
            owner_id: partition.owner_id,
            memory_type: new.memory_type,
            content: new.content.clone(),
            importance: new.importance,
            strength: 1.0,
            decay_rate,
            last_accessed_at: None,
            strength_updated_at: None,
            access_count: 0,
            source: new.source,
            created_at: now.clone(),
            updated_at: now,
            version: 1,
        };
        self.repo.insert_entry(&entry, embedding)?;

        let linking = AuxOutcome::from_result("linking", self.auto_link(&entry, embedding));

        info!(
            id = %entry.id,
            partition = %entry.partition(),
            memory_type = %entry.memory_type,
            links = linking.affected(),
            "memory stored"
        );
        Ok(StoreOutcome {
            entry,
            action: StoreAction::Created,
            linking,
            reembedding: AuxOutcome::skipped("new entry"),
        })
    }

    /// Link `entry` to its related neighbors. Returns the number of edges written.
    fn auto_link(&self, entry: &MemoryEntry, embedding: &[f32]) -> Result<usize> {
        let config = &self.store_config;
        // one extra slot because the new entry is its own nearest neighbor
        let candidates =
            self.repo
                .find_nearest(&entry.partition(), embedding, config.link_candidates + 1)?;

        let mut linked = 0;
        for candidate in candidates
            .iter()
            .filter(|c| c.entry.id != entry.id)
            .take(config.link_candidates)
            .filter(|c| c.similarity >= config.link_threshold)
        {
            let weight = link_weight(
                candidate.similarity,
                config.link_threshold,
                config.link_weight_floor,
            );
            self.repo.upsert_association(&entry.id, &candidate.entry.id, weight)?;
            linked += 1;
        }
        Ok(linked)
    }
}
