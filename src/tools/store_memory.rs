//! MCP `store_memory` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use mnemos::memory::types::{MemoryType, NewMemory, Source};

use super::parse_partition;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct StoreMemoryParams {
    #[schemars(description = "The natural language content of the memory")]
    pub content: String,

    #[schemars(
        description = "Memory type: 'fact', 'preference', 'skill_note' or 'observation'. Defaults to 'fact'."
    )]
    pub r#type: Option<String>,

    #[schemars(description = "Ownership scope: 'personal', 'team' or 'global'")]
    pub scope: String,

    #[schemars(
        description = "User id for personal memories, team id for team memories. Omit for global."
    )]
    pub owner_id: Option<String>,

    #[schemars(description = "Importance 0.0-1.0. Important memories survive pruning.")]
    pub importance: Option<f64>,

    #[schemars(description = "Who produced this memory: 'explicit' (default) or 'inferred'")]
    pub source: Option<String>,

    #[schemars(description = "Forgetting speed per day. Lower values keep the memory longer.")]
    pub decay_rate: Option<f64>,
}

impl StoreMemoryParams {
    pub fn into_new_memory(self, default_importance: f64) -> Result<NewMemory, String> {
        let partition = parse_partition(&self.scope, self.owner_id)?;
        let memory_type = match self.r#type.as_deref() {
            Some(t) => t.parse::<MemoryType>()?,
            None => MemoryType::Fact,
        };
        let source = match self.source.as_deref() {
            Some(s) => s.parse::<Source>()?,
            None => Source::Explicit,
        };
        // consolidation-authored entries are never pruned; clients can't claim that
        if source == Source::Consolidation {
            return Err("source 'consolidation' is reserved for the consolidation service".into());
        }

        let mut new = NewMemory::new(partition, memory_type, self.content)
            .importance(self.importance.unwrap_or(default_importance))
            .source(source);
        if let Some(rate) = self.decay_rate {
            new = new.decay_rate(rate);
        }
        Ok(new)
    }
}
