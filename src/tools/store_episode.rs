//! MCP `store_episode` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use mnemos::memory::types::NewEpisode;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreEpisodeParams {
    #[schemars(description = "Narrative summary of the conversation")]
    pub summary: String,

    #[schemars(description = "User the conversation belongs to")]
    pub owner_id: Option<String>,

    #[schemars(description = "Team the conversation belongs to")]
    pub team_id: Option<String>,

    #[schemars(description = "Topics discussed")]
    pub topics: Option<Vec<String>>,

    #[schemars(description = "Decisions reached")]
    pub decisions: Option<Vec<String>>,

    #[schemars(description = "RFC 3339 start of the conversation")]
    pub period_start: String,

    #[schemars(description = "RFC 3339 end of the conversation")]
    pub period_end: String,
}

impl From<StoreEpisodeParams> for NewEpisode {
    fn from(p: StoreEpisodeParams) -> Self {
        NewEpisode {
            owner_id: p.owner_id,
            team_id: p.team_id,
            summary: p.summary,
            topics: p.topics.unwrap_or_default(),
            decisions: p.decisions.unwrap_or_default(),
            period_start: p.period_start,
            period_end: p.period_end,
        }
    }
}
