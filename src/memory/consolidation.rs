//! Periodic maintenance: persist decay, prune forgotten entries, merge
//! near-duplicates, clean up the association graph and the audit log.
//!
//! Every phase is fault-isolated. A failing phase is logged, recorded in
//! [`ConsolidationReport::errors`] and the remaining phases still run. All
//! writes are version-conditional, so a cycle running alongside live traffic
//! skips whatever changed under it and picks it up next time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::decay::DecayModel;
use super::repository::{MemoryRepository, MergePlan};
use super::types::{MemoryEntry, Source};
use crate::config::{ConsolidationConfig, MnemosConfig};
use crate::embedding::cosine_similarity;
use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    /// Entries whose decayed strength was written back.
    pub decayed: usize,
    pub pruned: usize,
    /// Duplicate entries folded into a survivor.
    pub merged: usize,
    pub associations_decayed: usize,
    pub orphans_removed: usize,
    pub weak_associations_removed: usize,
    /// Audit rows of deleted memories past retention.
    pub audit_records_trimmed: usize,
    /// `phase: error` for every phase that failed.
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

pub struct ConsolidationService {
    repo: Arc<dyn MemoryRepository>,
    decay: DecayModel,
    config: ConsolidationConfig,
}

impl ConsolidationService {
    pub fn new(repo: Arc<dyn MemoryRepository>, config: &MnemosConfig) -> Self {
        Self {
            repo,
            decay: DecayModel::new(config.decay.clone()),
            config: config.consolidation.clone(),
        }
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    pub fn consolidate(&self) -> ConsolidationReport {
        self.consolidate_at(Utc::now())
    }

    /// Run one cycle as of `now`.
    pub fn consolidate_at(&self, now: DateTime<Utc>) -> ConsolidationReport {
        let started = Instant::now();
        let mut report = ConsolidationReport::default();

        // 1. Decay persistence
        report.decayed = run_phase(
            &mut report.errors,
            "decay",
            self.decay.persist_decay(self.repo.as_ref(), now),
        );

        // 2. Prune
        report.pruned = run_phase(&mut report.errors, "prune", self.prune(now));

        // 3. Deduplicate
        report.merged = run_phase(&mut report.errors, "dedup", self.deduplicate(now));

        // 4. Association cleanup
        report.associations_decayed = run_phase(
            &mut report.errors,
            "association_decay",
            self.repo.decay_associations(self.config.association_decay),
        );
        report.orphans_removed = run_phase(
            &mut report.errors,
            "orphan_cleanup",
            self.repo.delete_orphan_associations(),
        );
        report.weak_associations_removed = run_phase(
            &mut report.errors,
            "weak_association_cleanup",
            self.repo
                .delete_weak_associations(self.config.min_association_weight),
        );

        // 5. Audit retention
        report.audit_records_trimmed =
            run_phase(&mut report.errors, "audit_retention", self.trim_audit_log(now));

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            decayed = report.decayed,
            pruned = report.pruned,
            merged = report.merged,
            orphans = report.orphans_removed,
            weak_edges = report.weak_associations_removed,
            audit_trimmed = report.audit_records_trimmed,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "consolidation complete"
        );
        report
    }

    fn trim_audit_log(&self, now: DateTime<Utc>) -> Result<usize> {
        if self.config.audit_retention_days == 0 {
            return Ok(0);
        }
        let cutoff = now - Duration::days(i64::from(self.config.audit_retention_days));
        self.repo.trim_audit_log(&cutoff.to_rfc3339())
    }

    fn is_forgotten(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> Option<f64> {
        if entry.source == Source::Consolidation
            || entry.importance >= self.config.protected_importance
        {
            return None;
        }
        let effective = self.decay.effective_strength(entry, now);
        (effective < self.config.forgotten_threshold).then_some(effective)
    }

    fn prune(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut pruned = 0;
        for entry in self.repo.list_entries(None)? {
            let Some(effective) = self.is_forgotten(&entry, now) else {
                continue;
            };
            if self.repo.prune_entry(&entry.id, entry.version, effective)? {
                debug!(id = %entry.id, effective, "pruned forgotten memory");
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    /// Combined keep-score for choosing the survivor of a duplicate pair.
    fn keep_score(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        entry.importance
            + self.decay.effective_strength(entry, now)
            + entry.access_count as f64 * self.config.access_weight
    }

    /// Order `(a, b)` as `(winner, loser)`. Ties keep the older entry.
    fn pick_winner<'a>(
        &self,
        a: &'a MemoryEntry,
        b: &'a MemoryEntry,
        now: DateTime<Utc>,
    ) -> (&'a MemoryEntry, &'a MemoryEntry) {
        let (sa, sb) = (self.keep_score(a, now), self.keep_score(b, now));
        let a_older = (a.created_at.as_str(), a.id.as_str()) <= (b.created_at.as_str(), b.id.as_str());
        if sa > sb || (sa == sb && a_older) {
            (a, b)
        } else {
            (b, a)
        }
    }

    fn deduplicate(&self, now: DateTime<Utc>) -> Result<usize> {
        let at = now.to_rfc3339();
        let mut merged = 0;

        for partition in self.repo.list_partitions()? {
            let rows = self.repo.entry_embeddings(&partition)?;

            let mut pairs: Vec<(usize, usize, f64)> = Vec::new();
            for i in 0..rows.len() {
                for j in (i + 1)..rows.len() {
                    let similarity = cosine_similarity(&rows[i].1, &rows[j].1);
                    if similarity >= self.config.dedup_threshold {
                        pairs.push((i, j, similarity));
                    }
                }
            }
            // strongest duplicates first; each entry takes part in one merge per cycle
            pairs.sort_by(|a, b| b.2.total_cmp(&a.2));

            let mut touched: HashSet<usize> = HashSet::new();
            for (i, j, similarity) in pairs {
                if touched.contains(&i) || touched.contains(&j) {
                    continue;
                }
                let (winner, loser) = self.pick_winner(&rows[i].0, &rows[j].0, now);
                let plan = MergePlan {
                    winner_id: winner.id.clone(),
                    winner_version: winner.version,
                    loser_id: loser.id.clone(),
                    loser_version: loser.version,
                    winner_strength: (self.decay.effective_strength(winner, now)
                        + self.config.merge_strength_boost)
                        .min(1.0),
                    similarity,
                    at: at.clone(),
                };
                touched.insert(i);
                touched.insert(j);
                if self.repo.merge_entries(&plan)? {
                    info!(
                        winner = %plan.winner_id,
                        loser = %plan.loser_id,
                        similarity,
                        %partition,
                        "merged duplicate memories"
                    );
                    merged += 1;
                } else {
                    debug!(winner = %plan.winner_id, loser = %plan.loser_id, "merge skipped, entry changed");
                }
            }
        }
        Ok(merged)
    }
}

fn run_phase(errors: &mut Vec<String>, phase: &'static str, result: Result<usize>) -> usize {
    match result {
        Ok(n) => n,
        Err(e) => {
            warn!(phase, error = %e, "consolidation phase failed");
            errors.push(format!("{phase}: {e}"));
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::memory::in_memory::InMemoryRepository;
    use crate::memory::testing::{axis, entry_template, seed_entry, tilted};
    use crate::memory::types::Partition;

    fn setup() -> (ConsolidationService, Arc<InMemoryRepository>) {
        let repo = Arc::new(InMemoryRepository::new());
        let service = ConsolidationService::new(repo.clone(), &MnemosConfig::default());
        (service, repo)
    }

    fn alice() -> Partition {
        Partition::personal("alice")
    }

    /// An entry whose stored strength has already faded to `strength`.
    fn faded(
        repo: &InMemoryRepository,
        content: &str,
        vector: &[f32],
        strength: f64,
        importance: f64,
        source: Source,
    ) -> MemoryEntry {
        let now = Utc::now();
        let entry = MemoryEntry {
            strength,
            importance,
            source,
            strength_updated_at: Some(now.to_rfc3339()),
            ..entry_template(&alice(), content, now)
        };
        repo.insert_entry(&entry, vector).unwrap();
        entry
    }

    #[test]
    fn prunes_forgotten_but_spares_important_twin() {
        let (service, repo) = setup();
        let weak = faded(&repo, "weak", &axis(0), 0.03, 0.2, Source::Explicit);
        let important = faded(&repo, "important", &axis(1), 0.03, 0.85, Source::Explicit);

        let report = service.consolidate();
        assert_eq!(report.pruned, 1);
        assert!(report.errors.is_empty());
        assert!(repo.get_entry(&weak.id).unwrap().is_none());
        assert!(repo.get_entry(&important.id).unwrap().is_some());
    }

    #[test]
    fn high_importance_is_never_pruned_however_faded() {
        let (service, repo) = setup();
        let entry = faded(&repo, "ancient", &axis(0), 0.0, 0.8, Source::Inferred);
        for _ in 0..3 {
            service.consolidate();
        }
        assert!(repo.get_entry(&entry.id).unwrap().is_some());
    }

    #[test]
    fn consolidation_authored_entries_are_never_pruned() {
        let (service, repo) = setup();
        let entry = faded(&repo, "summary", &axis(0), 0.01, 0.1, Source::Consolidation);
        assert_eq!(service.consolidate().pruned, 0);
        assert!(repo.get_entry(&entry.id).unwrap().is_some());
    }

    #[test]
    fn decay_is_persisted_for_unqueried_entries() {
        let (service, repo) = setup();
        let old = seed_entry(repo.as_ref(), &alice(), "old", &axis(0), Utc::now() - Duration::days(10));

        let report = service.consolidate();
        assert_eq!(report.decayed, 1);
        let after = repo.get_entry(&old.id).unwrap().unwrap();
        let expected = (-0.05f64 * 10.0).exp();
        assert!((after.strength - expected).abs() < 1e-3, "{}", after.strength);
        assert!(after.strength_updated_at.is_some());
        assert_eq!(after.access_count, 0);
    }

    #[test]
    fn merges_duplicates_into_the_stronger_entry() {
        let (service, repo) = setup();
        let now = Utc::now();
        let a = seed_entry(repo.as_ref(), &alice(), "a", &axis(0), now);
        let b = seed_entry(repo.as_ref(), &alice(), "b", &tilted(0, 1, 0.97), now);
        let n = seed_entry(repo.as_ref(), &alice(), "n", &axis(5), now);
        // make `b` the better keeper
        repo.reconsolidate(&crate::memory::repository::Reconsolidation {
            id: b.id.clone(),
            expected_version: b.version,
            content: "b".into(),
            importance: 0.9,
            strength: 1.0,
            decay_rate: 0.05,
            at: now.to_rfc3339(),
            similarity: 1.0,
        })
        .unwrap();
        repo.upsert_association(&a.id, &n.id, 0.7).unwrap();

        let report = service.consolidate();
        assert_eq!(report.merged, 1);
        assert!(repo.get_entry(&a.id).unwrap().is_none());

        let winner = repo.get_entry(&b.id).unwrap().unwrap();
        assert_eq!(winner.access_count, 1);
        assert!(winner.strength <= 1.0);

        let edges = repo.associations_for(&[b.id.clone()]).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].other(&b.id), Some(n.id.as_str()));
    }

    #[test]
    fn ties_keep_the_older_entry() {
        let (service, repo) = setup();
        let now = Utc::now();
        let anchored = |content: &str, age: i64| MemoryEntry {
            strength_updated_at: Some(now.to_rfc3339()),
            ..entry_template(&alice(), content, now - Duration::seconds(age))
        };
        let older = anchored("first", 10);
        let newer = anchored("second", 5);
        repo.insert_entry(&newer, &axis(0)).unwrap();
        repo.insert_entry(&older, &axis(0)).unwrap();

        assert_eq!(service.consolidate_at(now).merged, 1);
        assert!(repo.get_entry(&older.id).unwrap().is_some());
        assert!(repo.get_entry(&newer.id).unwrap().is_none());
    }

    #[test]
    fn dedup_never_crosses_partitions() {
        let (service, repo) = setup();
        let now = Utc::now();
        seed_entry(repo.as_ref(), &alice(), "same", &axis(0), now);
        seed_entry(repo.as_ref(), &Partition::personal("bob"), "same", &axis(0), now);
        seed_entry(repo.as_ref(), &Partition::global(), "same", &axis(0), now);
        assert_eq!(service.consolidate().merged, 0);
        assert_eq!(repo.list_entries(None).unwrap().len(), 3);
    }

    #[test]
    fn each_entry_merges_at_most_once_per_cycle() {
        let (service, repo) = setup();
        let now = Utc::now();
        for name in ["x", "y", "z"] {
            seed_entry(repo.as_ref(), &alice(), name, &axis(0), now);
        }
        assert_eq!(service.consolidate().merged, 1);
        assert_eq!(service.consolidate().merged, 1);
        assert_eq!(repo.list_entries(None).unwrap().len(), 1);
    }

    #[test]
    fn related_but_distinct_entries_are_not_merged() {
        let (service, repo) = setup();
        let now = Utc::now();
        seed_entry(repo.as_ref(), &alice(), "a", &axis(0), now);
        seed_entry(repo.as_ref(), &alice(), "b", &tilted(0, 1, 0.93), now);
        assert_eq!(service.consolidate().merged, 0);
    }

    #[test]
    fn association_cleanup_decays_and_drops_weak_edges() {
        let (service, repo) = setup();
        let now = Utc::now();
        let a = seed_entry(repo.as_ref(), &alice(), "a", &axis(0), now);
        let b = seed_entry(repo.as_ref(), &alice(), "b", &axis(1), now);
        let c = seed_entry(repo.as_ref(), &alice(), "c", &axis(2), now);
        repo.upsert_association(&a.id, &b.id, 0.9).unwrap();
        repo.upsert_association(&a.id, &c.id, 0.1).unwrap();

        let report = service.consolidate();
        assert_eq!(report.associations_decayed, 2);
        assert_eq!(report.weak_associations_removed, 1);
        let edges = repo.associations_for(&[a.id.clone()]).unwrap();
        assert_eq!(edges.len(), 1);
        assert!((edges[0].weight - 0.9 * 0.98).abs() < 1e-9);
    }

    #[test]
    fn audit_history_of_deleted_memories_expires() {
        let (service, repo) = setup();
        let weak = faded(&repo, "weak", &axis(0), 0.03, 0.2, Source::Explicit);
        let kept = faded(&repo, "kept", &axis(1), 1.0, 0.9, Source::Explicit);

        let first = service.consolidate();
        assert_eq!(first.pruned, 1);
        assert_eq!(first.audit_records_trimmed, 0);
        assert_eq!(repo.audit_trail(&weak.id, 10).unwrap().len(), 2);

        let later = service.consolidate_at(Utc::now() + Duration::days(91));
        assert!(later.errors.is_empty(), "{:?}", later.errors);
        assert_eq!(later.audit_records_trimmed, 2);
        assert!(repo.audit_trail(&weak.id, 10).unwrap().is_empty());
        assert_eq!(repo.audit_trail(&kept.id, 10).unwrap().len(), 1);
    }

    #[test]
    fn zero_retention_keeps_the_audit_log() {
        let repo = Arc::new(InMemoryRepository::new());
        let mut config = MnemosConfig::default();
        config.consolidation.audit_retention_days = 0;
        let service = ConsolidationService::new(repo.clone(), &config);
        let weak = faded(&repo, "weak", &axis(0), 0.03, 0.2, Source::Explicit);

        service.consolidate();
        let later = service.consolidate_at(Utc::now() + Duration::days(3650));
        assert_eq!(later.audit_records_trimmed, 0);
        assert_eq!(repo.audit_trail(&weak.id, 10).unwrap().len(), 2);
    }

    #[test]
    fn second_cycle_is_quiet() {
        let (service, repo) = setup();
        let now = Utc::now();
        seed_entry(repo.as_ref(), &alice(), "a", &axis(0), now);
        seed_entry(repo.as_ref(), &alice(), "a again", &axis(0), now);
        faded(&repo, "weak", &axis(3), 0.01, 0.1, Source::Explicit);

        let first = service.consolidate();
        assert_eq!((first.pruned, first.merged), (1, 1));
        let second = service.consolidate();
        assert_eq!((second.pruned, second.merged), (0, 0));
    }
}
