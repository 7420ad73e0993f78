//! MCP `search_memory` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(
        description = "Search a single partition: 'personal', 'team' or 'global'. Omit to search the user's personal memories, their team's and the global pool together."
    )]
    pub scope: Option<String>,

    #[schemars(description = "Owner of the partition named by `scope` (user or team id)")]
    pub owner_id: Option<String>,

    #[schemars(description = "User id for a cross-scope search")]
    pub user_id: Option<String>,

    #[schemars(description = "Team id for a cross-scope search")]
    pub team_id: Option<String>,

    #[schemars(description = "Maximum results (default 10, max 50)")]
    pub limit: Option<usize>,

    #[schemars(
        description = "Single-partition only: when the best match is weak, follow associations for a deeper search (default true)"
    )]
    pub escalate: Option<bool>,
}

impl SearchMemoryParams {
    /// Weak single-partition results escalate to a deep search unless the
    /// caller opts out.
    pub fn escalates(&self) -> bool {
        self.escalate.unwrap_or(true)
    }
}
