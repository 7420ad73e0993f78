//! Spreading activation over the association graph.
//!
//! One-hop [`expand`](MemoryService::expand) runs after every hybrid search:
//! a neighbor of a seed inherits `seed_score × edge_weight × damping`, taking
//! the strongest incoming edge. Entries the vector query already scored keep
//! their own score unless activation lifts it; seeds are never rescored and
//! never appear twice.
//!
//! [`deep_search`](MemoryService::deep_search) repeats the spread for several
//! hops with compounding damping. Each hop blends propagated activation with
//! the neighbor's intrinsic quality so a distant neighbor is not ranked purely
//! by its distance. [`recall`](MemoryService::recall) escalates to it when a
//! plain search comes back weak.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::outcome::{AuxOutcome, SearchOutcome};
use super::search::{sort_by_score, SearchOptions};
use super::service::MemoryService;
use super::types::{Origin, Partition, ScoredEntry};
use crate::error::Result;

/// Activation reaching one neighbor through its strongest edge.
struct Activation {
    id: String,
    propagated: f64,
    via: String,
}

impl MemoryService {
    /// Seeds (the first `limit` of `ranked`) plus their one-hop neighbors,
    /// re-sorted and truncated to `limit`.
    pub(crate) fn expand(
        &self,
        ranked: &[ScoredEntry],
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEntry>> {
        let (seeds, rest) = ranked.split_at(limit.min(ranked.len()));
        let mut pool = seeds.to_vec();
        if pool.is_empty() {
            return Ok(pool);
        }
        let known: HashMap<&str, &ScoredEntry> =
            rest.iter().map(|r| (r.entry.id.as_str(), r)).collect();
        let seen: HashSet<String> = seeds.iter().map(|s| s.entry.id.clone()).collect();

        let activations = self.propagate(seeds, &seen, self.retrieval.damping)?;
        pool.extend(self.activate(activations, &known, 1, None, now)?);

        sort_by_score(&mut pool);
        pool.truncate(limit);
        Ok(pool)
    }

    /// Hybrid search followed by up to `max_hops` rounds of spreading
    /// activation. Reinforces the final results unless `options` says otherwise.
    pub fn deep_search(
        &self,
        query: &str,
        partition: &Partition,
        limit: usize,
        max_hops: u32,
        options: &SearchOptions,
    ) -> Result<SearchOutcome> {
        let partition = Partition::new(partition.scope, partition.owner_id.clone())?;
        if limit == 0 {
            return Ok(SearchOutcome::empty("limit is zero"));
        }
        let embedding = self.embed(query)?;
        let now = Utc::now();
        let (results, expansion) =
            self.deep_search_embedded(&embedding, &partition, limit, max_hops, options, now)?;
        let reinforcement = self.reinforce(&results, options.reinforce.unwrap_or(true));
        Ok(SearchOutcome {
            results,
            expansion,
            reinforcement,
            escalated: false,
        })
    }

    /// Search, escalating to a deep search when the best result scores below
    /// the confidence threshold.
    pub fn recall(
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

        let (shallow, shallow_expansion) =
            self.search_embedded(&embedding, &partition, limit, options, now)?;
        let confident = shallow
            .first()
            .is_some_and(|top| top.score >= self.retrieval.confident_score);

        let (results, expansion, escalated) = if confident {
            (shallow, shallow_expansion, false)
        } else {
            info!(
                %partition,
                top_score = shallow.first().map(|r| r.score),
                "weak search result, escalating to deep search"
            );
            let (deep, deep_expansion) = self.deep_search_embedded(
                &embedding,
                &partition,
                limit,
                self.retrieval.max_hops,
                options,
                now,
            )?;
            (deep, deep_expansion, true)
        };

        let reinforce = options
            .reinforce
            .unwrap_or(escalated || self.retrieval.reinforce_on_search);
        let reinforcement = self.reinforce(&results, reinforce);
        Ok(SearchOutcome {
            results,
            expansion,
            reinforcement,
            escalated,
        })
    }

    fn deep_search_embedded(
        &self,
        embedding: &[f32],
        partition: &Partition,
        limit: usize,
        max_hops: u32,
        options: &SearchOptions,
        now: DateTime<Utc>,
    ) -> Result<(Vec<ScoredEntry>, AuxOutcome)> {
        let weights = options.weights.unwrap_or(self.retrieval.weights);
        let ranked = self.ranked(embedding, partition, limit, &weights, now)?;
        let (seeds, rest) = ranked.split_at(limit.min(ranked.len()));
        if seeds.is_empty() {
            return Ok((vec![], AuxOutcome::skipped("no candidates")));
        }
        let known: HashMap<&str, &ScoredEntry> =
            rest.iter().map(|r| (r.entry.id.as_str(), r)).collect();

        let mut pool = seeds.to_vec();
        let expansion = match self.spread(seeds, &known, max_hops, now) {
            Ok(discovered) => {
                let added = discovered.len();
                pool.extend(discovered);
                AuxOutcome::Completed { affected: added }
            }
            Err(e) => AuxOutcome::from_result("expansion", Err(e)),
        };
        sort_by_score(&mut pool);
        pool.truncate(limit);
        Ok((pool, expansion))
    }

    /// Multi-hop spread from `seeds`. Returns every entry discovered along the way.
    fn spread(
        &self,
        seeds: &[ScoredEntry],
        known: &HashMap<&str, &ScoredEntry>,
        max_hops: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEntry>> {
        let mut seen: HashSet<String> = seeds.iter().map(|s| s.entry.id.clone()).collect();
        let mut frontier = seeds.to_vec();
        let mut discovered = Vec::new();

        for hop in 1..=max_hops {
            let damping = self.retrieval.damping.powi(hop as i32);
            let activations = self.propagate(&frontier, &seen, damping)?;
            let found = self.activate(
                activations,
                known,
                hop,
                Some(self.retrieval.propagation_share),
                now,
            )?;
            if found.is_empty() {
                debug!(hop, "activation spread exhausted");
                break;
            }
            seen.extend(found.iter().map(|f| f.entry.id.clone()));
            discovered.extend(found.iter().cloned());
            frontier = found;
        }
        Ok(discovered)
    }

    /// Activation flowing from `frontier` into every neighbor not in `seen`,
    /// strongest incoming edge per neighbor, in first-reached order.
    fn propagate(
        &self,
        frontier: &[ScoredEntry],
        seen: &HashSet<String>,
        damping: f64,
    ) -> Result<Vec<Activation>> {
        let scores: HashMap<&str, f64> = frontier
            .iter()
            .map(|f| (f.entry.id.as_str(), f.score))
            .collect();
        let ids: Vec<String> = frontier.iter().map(|f| f.entry.id.clone()).collect();
        let edges = self.repo.associations_for(&ids)?;

        let mut activations: Vec<Activation> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for edge in &edges {
            for (from, to) in [
                (&edge.source_id, &edge.target_id),
                (&edge.target_id, &edge.source_id),
            ] {
                let Some(&parent) = scores.get(from.as_str()) else {
                    continue;
                };
                if seen.contains(to) || scores.contains_key(to.as_str()) {
                    continue;
                }
                let propagated = parent * edge.weight * damping;
                match index.get(to) {
                    Some(&i) if propagated > activations[i].propagated => {
                        activations[i].propagated = propagated;
                        activations[i].via = from.clone();
                    }
                    Some(_) => {}
                    None => {
                        index.insert(to.clone(), activations.len());
                        activations.push(Activation {
                            id: to.clone(),
                            propagated,
                            via: from.clone(),
                        });
                    }
                }
            }
        }
        Ok(activations)
    }

    /// Hydrate activated neighbors and score them. With `blend = Some(share)`
    /// the score is `share × propagated + (1 − share) × intrinsic`; otherwise
    /// it is the propagated activation. Vanished ids are dropped; entries the
    /// vector query already scored keep the higher of the two scores.
    fn activate(
        &self,
        activations: Vec<Activation>,
        known: &HashMap<&str, &ScoredEntry>,
        hops: u32,
        blend: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ScoredEntry>> {
        if activations.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<String> = activations.iter().map(|a| a.id.clone()).collect();
        let mut entries: HashMap<String, _> = self
            .repo
            .get_entries(&ids)?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        let mut out = Vec::with_capacity(activations.len());
        for activation in activations {
            let Some(entry) = entries.remove(&activation.id) else {
                continue;
            };
            let strength = self.decay.effective_strength(&entry, now);
            let frequency = self.decay.frequency_score(&entry);
            let score = match blend {
                Some(share) => {
                    let intrinsic = (strength + entry.importance + frequency) / 3.0;
                    share * activation.propagated + (1.0 - share) * intrinsic
                }
                None => activation.propagated,
            };

            if let Some(existing) = known.get(activation.id.as_str()) {
                if existing.score >= score {
                    out.push((*existing).clone());
                    continue;
                }
            }
            out.push(ScoredEntry {
                similarity: known
                    .get(activation.id.as_str())
                    .map_or(0.0, |k| k.similarity),
                strength,
                recency: self.decay.recency_score(&entry, now),
                frequency,
                score,
                origin: Origin::Association {
                    hops,
                    via: activation.via,
                },
                entry,
            });
        }
        Ok(out)
    }
}
