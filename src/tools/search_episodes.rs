use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchEpisodesParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(description = "Match episodes owned by this user")]
    pub user_id: Option<String>,

    #[schemars(description = "Match episodes belonging to this team")]
    pub team_id: Option<String>,

    #[schemars(description = "Maximum results (default 10, max 50)")]
    pub limit: Option<usize>,
}
