//! Result types that keep a primary result apart from its best-effort side effects.
//!
//! Auto-linking, recall reinforcement, re-embedding and associative expansion
//! never fail the operation that triggered them. Their outcome is reported in
//! an [`AuxOutcome`] next to the primary result and logged at `warn` on failure.

use serde::Serialize;
use tracing::warn;

use super::types::{MemoryEntry, ScoredEntry};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuxOutcome {
    Completed { affected: usize },
    Skipped { reason: String },
    Failed { error: String },
}

impl AuxOutcome {
    /// Convert a side-effect result, logging failures under `effect`.
    pub fn from_result(effect: &'static str, result: Result<usize>) -> Self {
        match result {
            Ok(affected) => Self::Completed { affected },
            Err(e) => {
                warn!(effect, error = %e, "best-effort step failed");
                Self::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn affected(&self) -> usize {
        match self {
            Self::Completed { affected } => *affected,
            _ => 0,
        }
    }
}

/// What the store path did with the new content.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreAction {
    Created,
    /// Merged into an existing near-duplicate.
    Reconsolidated { previous_content: String, similarity: f64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreOutcome {
    pub entry: MemoryEntry,
    pub action: StoreAction,
    /// Association edges written for a new entry.
    pub linking: AuxOutcome,
    /// Embedding refresh after a reconsolidation.
    pub reembedding: AuxOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<ScoredEntry>,
    pub expansion: AuxOutcome,
    pub reinforcement: AuxOutcome,
    /// Set by `recall` when a weak shallow result escalated to a deep search.
    pub escalated: bool,
}

impl SearchOutcome {
    pub fn empty(reason: &str) -> Self {
        Self {
            results: vec![],
            expansion: AuxOutcome::skipped(reason),
            reinforcement: AuxOutcome::skipped(reason),
            escalated: false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.results.iter().map(|r| r.entry.id.clone()).collect()
    }

    pub fn top_score(&self) -> Option<f64> {
        self.results.first().map(|r| r.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MemoryError;

    #[test]
    fn from_result_maps_success_and_failure() {
        assert_eq!(
            AuxOutcome::from_result("linking", Ok(3)),
            AuxOutcome::Completed { affected: 3 }
        );
        let failed = AuxOutcome::from_result("linking", Err(MemoryError::NotFound("x".into())));
        assert!(failed.is_failed());
        assert_eq!(failed.affected(), 0);
    }

    #[test]
    fn serializes_with_status_tag() {
        let json = serde_json::to_value(AuxOutcome::skipped("disabled")).unwrap();
        assert_eq!(json["status"], "skipped");
        assert_eq!(json["reason"], "disabled");
    }
}
