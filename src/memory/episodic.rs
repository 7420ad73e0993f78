//! Episodic memory: immutable conversation rollups searched by similarity.
//!
//! Episodes carry no strength, decay or edges; they are written once by a
//! summarizer and only ever read back.

use chrono::Utc;
use tracing::{debug, info};

use super::decay::parse_timestamp;
use super::repository::EpisodeFilter;
use super::service::MemoryService;
use super::types::{ConversationSummary, EpisodeHit, NewEpisode};
use crate::error::{MemoryError, Result};

fn non_empty(id: Option<&str>) -> Option<String> {
    id.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

impl MemoryService {
    pub fn record_episode(&self, new: NewEpisode) -> Result<ConversationSummary> {
        let owner_id = non_empty(new.owner_id.as_deref());
        let team_id = non_empty(new.team_id.as_deref());
        if owner_id.is_none() && team_id.is_none() {
            return Err(MemoryError::InvalidInput(
                "an episode needs an owner_id or a team_id".into(),
            ));
        }
        if new.summary.trim().is_empty() {
            return Err(MemoryError::InvalidInput("summary must not be empty".into()));
        }
        let (Some(start), Some(end)) = (
            parse_timestamp(&new.period_start),
            parse_timestamp(&new.period_end),
        ) else {
            return Err(MemoryError::InvalidInput(
                "period_start and period_end must be RFC 3339 timestamps".into(),
            ));
        };
        if end < start {
            return Err(MemoryError::InvalidInput(
                "period_end is before period_start".into(),
            ));
        }

        let embedding = self.embed(&new.embedding_text())?;
        let episode = ConversationSummary {
            id: uuid::Uuid::now_v7().to_string(),
            owner_id,
            team_id,
            summary: new.summary,
            topics: new.topics,
            decisions: new.decisions,
            period_start: start.to_rfc3339(),
            period_end: end.to_rfc3339(),
            created_at: Utc::now().to_rfc3339(),
        };
        self.repo.insert_episode(&episode, &embedding)?;
        info!(id = %episode.id, topics = episode.topics.len(), "episode recorded");
        Ok(episode)
    }

    /// Episodes owned by `user_id` or belonging to `team_id`, most similar first.
    pub fn search_episodic(
        &self,
        query: &str,
        user_id: Option<&str>,
        team_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EpisodeHit>> {
        let filter = EpisodeFilter {
            owner_id: non_empty(user_id),
            team_id: non_empty(team_id),
        };
        if filter.owner_id.is_none() && filter.team_id.is_none() {
            return Err(MemoryError::InvalidInput(
                "episodic search needs a user_id or a team_id".into(),
            ));
        }
        if limit == 0 {
            return Ok(vec![]);
        }
        let embedding = self.embed(query)?;
        let hits = self.repo.find_nearest_episodes(&filter, &embedding, limit)?;
        debug!(?filter, returned = hits.len(), "episodic search complete");
        Ok(hits)
    }
}
