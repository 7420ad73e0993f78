//! Forgetting curve and recall reinforcement.
//!
//! Strength decays exponentially from the moment it was last computed:
//!
//! ```text
//! effective = strength × e^(−decay_rate × days)
//! ```
//!
//! where `days` is measured from `strength_updated_at`, falling back to
//! `last_accessed_at`, then `created_at`. Persisting decay moves that anchor
//! forward, so the same interval is never applied twice.
//!
//! A recall moves strength a fixed fraction of the way back to 1.0
//! (`s + (1 − s) × recall_boost`), so repeated recalls approach but never reach
//! the ceiling. Recency (half-life on age since creation) and frequency
//! (`1 − e^(−access_count / saturation)`) are separate, read-only signals.
//!
//! All scoring functions take an explicit `now` and never fail: unparseable
//! timestamps fall back to the next anchor, and an unparseable `created_at`
//! counts as "just now".

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::repository::{MemoryRepository, StrengthUpdate};
use super::types::MemoryEntry;
use crate::config::DecayConfig;
use crate::error::Result;

const MS_PER_DAY: f64 = 86_400_000.0;

pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Days from `then` to `now`, clamped at zero for clock skew.
pub fn days_between(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - then).num_milliseconds() as f64 / MS_PER_DAY).max(0.0)
}

#[derive(Debug, Clone)]
pub struct DecayModel {
    config: DecayConfig,
}

impl DecayModel {
    pub fn new(config: DecayConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecayConfig {
        &self.config
    }

    fn days_since_created(entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        match parse_timestamp(&entry.created_at) {
            Some(created) => days_between(created, now),
            None => {
                warn!(id = %entry.id, created_at = %entry.created_at, "unparseable created_at, treating as now");
                0.0
            }
        }
    }

    /// Decay-adjusted strength at `now`, in `[0, 1]`.
    pub fn effective_strength(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        let anchor = entry
            .strength_updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| entry.last_accessed_at.as_deref().and_then(parse_timestamp));
        let days = match anchor {
            Some(t) => days_between(t, now),
            None => Self::days_since_created(entry, now),
        };
        let rate = entry.decay_rate.max(0.0);
        (entry.strength * (-rate * days).exp()).clamp(0.0, 1.0)
    }

    /// Half-life decay on age since creation. 1.0 for a brand-new entry.
    pub fn recency_score(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        let days = Self::days_since_created(entry, now);
        (-std::f64::consts::LN_2 * days / self.config.recency_half_life_days).exp()
    }

    /// Saturating function of the access count, in `[0, 1)`.
    pub fn frequency_score(&self, entry: &MemoryEntry) -> f64 {
        1.0 - (-(entry.access_count as f64) / self.config.frequency_saturation).exp()
    }

    /// Strength after one recall at `now`.
    pub fn reinforced_strength(&self, entry: &MemoryEntry, now: DateTime<Utc>) -> f64 {
        let s = self.effective_strength(entry, now);
        (s + (1.0 - s) * self.config.recall_boost).clamp(0.0, 1.0)
    }

    /// Record one recall for each distinct id. Ids that no longer exist are
    /// skipped. Returns the number of entries reinforced.
    ///
    /// Each recall is read and written under the repository's write lock, so
    /// concurrent recalls of the same entry all count.
    pub fn on_batch_recall(
        &self,
        repo: &dyn MemoryRepository,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();
        if unique.is_empty() {
            return Ok(0);
        }
        let recorded = repo.record_recalls(&unique, &now.to_rfc3339(), &|e: &MemoryEntry| {
            self.reinforced_strength(e, now)
        })?;
        debug!(requested = ids.len(), touched = recorded.len(), "batch recall recorded");
        Ok(recorded.len())
    }

    /// Write every entry's effective strength back to storage. Entries changed
    /// concurrently are left for the next run. Returns rows touched.
    pub fn persist_decay(&self, repo: &dyn MemoryRepository, now: DateTime<Utc>) -> Result<usize> {
        let at = now.to_rfc3339();
        let updates: Vec<StrengthUpdate> = repo
            .list_entries(None)?
            .iter()
            .map(|e| StrengthUpdate {
                id: e.id.clone(),
                expected_version: e.version,
                strength: self.effective_strength(e, now),
                at: at.clone(),
            })
            .collect();
        let applied = repo.apply_strength_updates(&updates)?;
        debug!(total = updates.len(), applied = applied.len(), "decay persisted");
        Ok(applied.len())
    }
}

impl Default for DecayModel {
    fn default() -> Self {
        Self::new(DecayConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::in_memory::InMemoryRepository;
    use crate::memory::types::{MemoryType, Scope, Source};
    use chrono::Duration;

    fn entry_at(created: DateTime<Utc>) -> MemoryEntry {
        MemoryEntry {
            id: "m1".into(),
            scope: Scope::Personal,
            owner_id: Some("alice".into()),
            memory_type: MemoryType::Fact,
            content: "User prefers dark mode".into(),
            importance: 0.5,
            strength: 1.0,
            decay_rate: 0.05,
            last_accessed_at: None,
            strength_updated_at: None,
            access_count: 0,
            source: Source::Explicit,
            created_at: created.to_rfc3339(),
            updated_at: created.to_rfc3339(),
            version: 1,
        }
    }

    fn store_one(repo: &InMemoryRepository, entry: &MemoryEntry) {
        repo.insert_entry(entry, &[1.0, 0.0]).unwrap();
    }

    #[test]
    fn fresh_entry_has_full_strength_and_recency() {
        let now = Utc::now();
        let model = DecayModel::default();
        let e = entry_at(now);
        assert!((model.effective_strength(&e, now) - 1.0).abs() < 1e-9);
        assert!((model.recency_score(&e, now) - 1.0).abs() < 1e-9);
        assert_eq!(model.frequency_score(&e), 0.0);
    }

    #[test]
    fn effective_strength_is_monotonically_non_increasing() {
        let created = Utc::now() - Duration::days(30);
        let model = DecayModel::default();
        let e = entry_at(created);
        let mut prev = f64::MAX;
        for day in 0..60 {
            let s = model.effective_strength(&e, created + Duration::days(day));
            assert!(s <= prev, "day {day}: {s} > {prev}");
            assert!((0.0..=1.0).contains(&s));
            prev = s;
        }
    }

    #[test]
    fn higher_decay_rate_forgets_faster() {
        let created = Utc::now() - Duration::days(10);
        let model = DecayModel::default();
        let slow = entry_at(created);
        let mut fast = entry_at(created);
        fast.decay_rate = 0.5;
        let now = Utc::now();
        assert!(model.effective_strength(&fast, now) < model.effective_strength(&slow, now));
    }

    #[test]
    fn recency_halves_every_half_life() {
        let now = Utc::now();
        let model = DecayModel::default();
        let e = entry_at(now - Duration::days(7));
        assert!((model.recency_score(&e, now) - 0.5).abs() < 1e-3);
    }

    #[test]
    fn frequency_has_diminishing_returns() {
        let model = DecayModel::default();
        let mut e = entry_at(Utc::now());
        let score = |count: u32, e: &mut MemoryEntry| {
            e.access_count = count;
            model.frequency_score(e)
        };
        let second_gain = score(2, &mut e) - score(1, &mut e);
        let fiftieth_gain = score(50, &mut e) - score(49, &mut e);
        assert!(second_gain > fiftieth_gain * 100.0);
        assert!(score(1000, &mut e) < 1.0 + 1e-12);
    }

    #[test]
    fn missing_last_access_falls_back_to_created_at() {
        let now = Utc::now();
        let model = DecayModel::default();
        let mut e = entry_at(now - Duration::days(10));
        let via_created = model.effective_strength(&e, now);
        e.last_accessed_at = Some(e.created_at.clone());
        assert!((model.effective_strength(&e, now) - via_created).abs() < 1e-9);
    }

    #[test]
    fn malformed_timestamps_degrade_instead_of_failing() {
        let now = Utc::now();
        let model = DecayModel::default();
        let mut e = entry_at(now);
        e.created_at = "not a date".into();
        e.last_accessed_at = Some("also garbage".into());
        e.strength = 0.7;
        assert!((model.effective_strength(&e, now) - 0.7).abs() < 1e-9);
        assert!((model.recency_score(&e, now) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn future_timestamps_do_not_inflate_strength() {
        let now = Utc::now();
        let model = DecayModel::default();
        let mut e = entry_at(now + Duration::days(3));
        e.strength = 0.4;
        assert!((model.effective_strength(&e, now) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn repeated_recall_approaches_but_never_exceeds_one() {
        let repo = InMemoryRepository::new();
        let model = DecayModel::default();
        let mut e = entry_at(Utc::now());
        e.strength = 0.3;
        store_one(&repo, &e);

        let ids = vec![e.id.clone()];
        let mut prev = 0.3;
        for _ in 0..40 {
            model.on_batch_recall(&repo, &ids, Utc::now()).unwrap();
            let s = repo.get_entry(&e.id).unwrap().unwrap().strength;
            assert!(s <= 1.0);
            assert!(s >= prev - 1e-6, "reinforcement went backwards: {s} < {prev}");
            prev = s;
        }
        let stored = repo.get_entry(&e.id).unwrap().unwrap();
        assert_eq!(stored.access_count, 40);
        assert!(stored.strength > 0.99);
    }

    #[test]
    fn single_recall_is_partial_not_a_reset() {
        let repo = InMemoryRepository::new();
        let model = DecayModel::default();
        let mut e = entry_at(Utc::now());
        e.strength = 0.5;
        store_one(&repo, &e);

        model.on_batch_recall(&repo, &[e.id.clone()], Utc::now()).unwrap();
        let s = repo.get_entry(&e.id).unwrap().unwrap().strength;
        assert!(s > 0.5 && s < 0.65, "got {s}");
    }

    #[test]
    fn batch_recall_dedupes_ids_and_skips_missing() {
        let repo = InMemoryRepository::new();
        let model = DecayModel::default();
        let e = entry_at(Utc::now());
        store_one(&repo, &e);

        let ids = vec![e.id.clone(), "gone".to_string(), e.id.clone()];
        let touched = model.on_batch_recall(&repo, &ids, Utc::now()).unwrap();
        assert_eq!(touched, 1);
        let stored = repo.get_entry(&e.id).unwrap().unwrap();
        assert_eq!(stored.access_count, 1);
        assert!(stored.last_accessed_at.is_some());
    }

    #[test]
    fn persist_decay_writes_back_without_double_counting() {
        let repo = InMemoryRepository::new();
        let model = DecayModel::default();
        let created = Utc::now() - Duration::days(20);
        let e = entry_at(created);
        store_one(&repo, &e);

        let t1 = created + Duration::days(10);
        let t2 = created + Duration::days(20);
        let expected_t2 = model.effective_strength(&e, t2);

        assert_eq!(model.persist_decay(&repo, t1).unwrap(), 1);
        let after_t1 = repo.get_entry(&e.id).unwrap().unwrap();
        assert!((after_t1.strength - model.effective_strength(&e, t1)).abs() < 1e-9);

        // querying at t2 after persisting at t1 matches never having persisted
        assert!((model.effective_strength(&after_t1, t2) - expected_t2).abs() < 1e-9);
        assert_eq!(after_t1.access_count, 0);
    }
}
