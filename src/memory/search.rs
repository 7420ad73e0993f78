//! Hybrid search: vector candidates re-ranked by a weighted blend of
//! similarity, decayed strength, recency, recall frequency and importance.
//!
//! The ranking pipeline is:
//!
//! 1. embed the query and over-fetch `min(multiplier × limit, max)` nearest
//!    candidates from the partition,
//! 2. score each candidate ([`hybrid_score`]) and stable-sort,
//! 3. take the top `limit` as seeds and expand them one hop over the
//!    association graph (see [`activation`](super::activation)),
//! 4. reinforce whatever was returned, unless disabled.
//!
//! Expansion and reinforcement are best-effort; their outcome is reported in
//! [`SearchOutcome`] and never fails the search.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::outcome::{AuxOutcome, SearchOutcome};
use super::service::MemoryService;
use super::types::{MemoryEntry, Origin, Partition, ScoredEntry, Scope};
use crate::config::ScoreWeights;
use crate::error::Result;

/// Per-call overrides for a search.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Replaces the configured weights for this call.
    pub weights: Option<ScoreWeights>,
    /// `None` uses the path's default: the configured flag for `search`,
    /// always-on for `deep_search`.
    pub reinforce: Option<bool>,
    pub expand: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            weights: None,
            reinforce: None,
            expand: true,
        }
    }
}

impl SearchOptions {
    /// Options for callers that reinforce on their own schedule.
    pub fn without_reinforcement() -> Self {
        Self {
            reinforce: Some(false),
            ..Self::default()
        }
    }
}

/// Weighted linear combination of the five ranking signals.
pub fn hybrid_score(
    weights: &ScoreWeights,
    similarity: f64,
    strength: f64,
    recency: f64,
    frequency: f64,
    importance: f64,
) -> f64 {
    weights.similarity * similarity.max(0.0)
        + weights.strength * strength
        + weights.recency * recency
        + weights.frequency * frequency
        + weights.importance * importance
}

/// Descending by score; equal scores keep their current order.
pub(crate) fn sort_by_score(results: &mut [ScoredEntry]) {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// `ceil(share × limit)`, tolerant of float noise like `0.3 × 10 = 3.0000000000000004`.
fn share_of(limit: usize, share: f64) -> usize {
    ((limit as f64 * share) - 1e-9).ceil().max(0.0) as usize
}

impl MemoryService {
    pub fn search(
        &self,
        query: &str,
        partition: &Partition,
        limit: usize,
        options: &SearchOptions,
    ) -> Result<SearchOutcome> {
        let partition = Partition::new(partition.scope, partition.owner_id.clone())?;
        if limit == 0 {
            return Ok(SearchOutcome::empty("limit is zero"));
        }
        let embedding = self.embed(query)?;
        let now = Utc::now();

        let (results, expansion) = self.search_embedded(&embedding, &partition, limit, options, now)?;
        let reinforcement = self.reinforce(
            &results,
            options.reinforce.unwrap_or(self.retrieval.reinforce_on_search),
        );
        debug!(%partition, limit, returned = results.len(), "search complete");
        Ok(SearchOutcome {
            results,
            expansion,
            reinforcement,
            escalated: false,
        })
    }

    /// Search the user's personal memories, their team's and the global pool
    /// in one call. Each partition contributes its configured share of `limit`
    /// (rounded up); the union is deduplicated by id, re-sorted and truncated.
    pub fn search_all_scopes(
        &self,
        query: &str,
        user_id: &str,
        team_id: Option<&str>,
        limit: usize,
        options: &SearchOptions,
    ) -> Result<SearchOutcome> {
        let mut plan = vec![(
            Partition::new(Scope::Personal, Some(user_id.to_string()))?,
            self.retrieval.personal_share,
        )];
        if let Some(team) = team_id {
            plan.push((
                Partition::new(Scope::Team, Some(team.to_string()))?,
                self.retrieval.team_share,
            ));
        }
        plan.push((Partition::global(), self.retrieval.global_share));

        if limit == 0 {
            return Ok(SearchOutcome::empty("limit is zero"));
        }
        let embedding = self.embed(query)?;
        let now = Utc::now();

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        let mut expansions = Vec::new();
        for (partition, share) in &plan {
            let quota = share_of(limit, *share);
            if quota == 0 {
                continue;
            }
            let (results, expansion) =
                self.search_embedded(&embedding, partition, quota, options, now)?;
            expansions.push(expansion);
            merged.extend(results.into_iter().filter(|r| seen.insert(r.entry.id.clone())));
        }
        sort_by_score(&mut merged);
        merged.truncate(limit);

        let expansion = match expansions.iter().find(|e| e.is_failed()) {
            Some(failed) => failed.clone(),
            None => AuxOutcome::Completed {
                affected: expansions.iter().map(AuxOutcome::affected).sum(),
            },
        };
        let reinforcement = self.reinforce(
            &merged,
            options.reinforce.unwrap_or(self.retrieval.reinforce_on_search),
        );
        debug!(user_id, ?team_id, limit, returned = merged.len(), "all-scope search complete");
        Ok(SearchOutcome {
            results: merged,
            expansion,
            reinforcement,
            escalated: false,
        })
    }

    /// Seeds plus one-hop expansion for a query that is already embedded.
    pub(crate) fn search_embedded(
        &self,
        embedding: &[f32],
        partition: &Partition,
        limit: usize,
        options: &SearchOptions,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ScoredEntry>, AuxOutcome)> {
        let weights = options.weights.unwrap_or(self.retrieval.weights);
        let ranked = self.ranked(embedding, partition, limit, &weights, now)?;
        if ranked.is_empty() {
            return Ok((ranked, AuxOutcome::skipped("no candidates")));
        }
        if !options.expand {
            let mut seeds = ranked;
            seeds.truncate(limit);
            return Ok((seeds, AuxOutcome::skipped("expansion disabled")));
        }

        match self.expand(&ranked, limit, now) {
            Ok(expanded) => {
                let added = expanded
                    .iter()
                    .filter(|r| matches!(r.origin, Origin::Association { .. }))
                    .count();
                Ok((expanded, AuxOutcome::Completed { affected: added }))
            }
            Err(e) => {
                let mut seeds = ranked;
                seeds.truncate(limit);
                Ok((seeds, AuxOutcome::from_result("expansion", Err(e))))
            }
        }
    }

    /// Every over-fetched candidate, scored and sorted. Callers take the seeds
    /// off the front.
    pub(crate) fn ranked(
        &self,
        embedding: &[f32],
        partition: &Partition,
        limit: usize,
        weights: &ScoreWeights,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEntry>> {
        let k = limit
            .saturating_mul(self.retrieval.candidate_multiplier)
            .min(self.retrieval.max_candidates);
        let mut ranked: Vec<ScoredEntry> = self
            .repo
            .find_nearest(partition, embedding, k)?
            .into_iter()
            .map(|c| self.score(c.entry, c.similarity, weights, now))
            .collect();
        sort_by_score(&mut ranked);
        Ok(ranked)
    }

    pub(crate) fn score(
        &self,
        entry: MemoryEntry,
        similarity: f64,
        weights: &ScoreWeights,
        now: DateTime<Utc>,
    ) -> ScoredEntry {
        let strength = self.decay.effective_strength(&entry, now);
        let recency = self.decay.recency_score(&entry, now);
        let frequency = self.decay.frequency_score(&entry);
        let score = hybrid_score(weights, similarity, strength, recency, frequency, entry.importance);
        ScoredEntry {
            entry,
            similarity,
            strength,
            recency,
            frequency,
            score,
            origin: Origin::Vector,
        }
    }

    /// Best-effort recall bookkeeping for returned results.
    pub(crate) fn reinforce(&self, results: &[ScoredEntry], enabled: bool) -> AuxOutcome {
        if !enabled {
            return AuxOutcome::skipped("reinforcement disabled");
        }
        if results.is_empty() {
            return AuxOutcome::skipped("nothing recalled");
        }
        let ids: Vec<String> = results.iter().map(|r| r.entry.id.clone()).collect();
        AuxOutcome::from_result("reinforcement", self.on_batch_recall(&ids))
    }
}
