//! MCP `deep_search` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DeepSearchParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(description = "Partition scope: 'personal', 'team' or 'global'")]
    pub scope: String,

    #[schemars(description = "User or team id owning the partition. Omit for global.")]
    pub owner_id: Option<String>,

    #[schemars(description = "Maximum results (default 10, max 50)")]
    pub limit: Option<usize>,

    #[schemars(description = "Association hops to follow (default 2, max 4)")]
    pub max_hops: Option<u32>,
}
