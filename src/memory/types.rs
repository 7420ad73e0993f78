//! Core memory type definitions.
//!
//! Defines [`Scope`] and [`Partition`] (ownership boundaries), [`MemoryType`],
//! [`Source`], [`MemoryEntry`] (a full record), [`MemoryAssociation`] (an
//! undirected weighted edge), [`ConversationSummary`] (an episode) and the
//! scored result types returned by search.

use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Ownership scope of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Owned by one user.
    Personal,
    /// Shared within a team.
    Team,
    /// Visible to everyone; has no owner.
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Team => "team",
            Self::Global => "global",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Self::Personal),
            "team" => Ok(Self::Team),
            "global" => Ok(Self::Global),
            _ => Err(format!("unknown scope: {s}")),
        }
    }
}

/// A `(scope, owner)` pair. Retrieval, linking and deduplication never cross
/// partition boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    pub scope: Scope,
    pub owner_id: Option<String>,
}

impl Partition {
    /// Validates that global partitions have no owner and the others do.
    pub fn new(scope: Scope, owner_id: Option<String>) -> Result<Self> {
        let owner_id = owner_id.filter(|o| !o.trim().is_empty());
        match (scope, &owner_id) {
            (Scope::Global, Some(owner)) => Err(MemoryError::InvalidInput(format!(
                "global memories have no owner, got {owner:?}"
            ))),
            (Scope::Personal | Scope::Team, None) => Err(MemoryError::InvalidInput(format!(
                "{scope} memories require an owner id"
            ))),
            _ => Ok(Self { scope, owner_id }),
        }
    }

    pub fn personal(user_id: impl Into<String>) -> Self {
        Self {
            scope: Scope::Personal,
            owner_id: Some(user_id.into()),
        }
    }

    pub fn team(team_id: impl Into<String>) -> Self {
        Self {
            scope: Scope::Team,
            owner_id: Some(team_id.into()),
        }
    }

    pub fn global() -> Self {
        Self {
            scope: Scope::Global,
            owner_id: None,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.owner_id {
            Some(owner) => write!(f, "{}:{owner}", self.scope),
            None => f.write_str(self.scope.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Preference,
    /// How-to knowledge an agent picked up while working.
    SkillNote,
    Observation,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::SkillNote => "skill_note",
            Self::Observation => "observation",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "preference" => Ok(Self::Preference),
            "skill_note" | "skill-note" => Ok(Self::SkillNote),
            "observation" => Ok(Self::Observation),
            _ => Err(format!("unknown memory type: {s}")),
        }
    }
}

/// Who authored a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Stated directly by a user or agent.
    Explicit,
    /// Extracted from conversation by a background process.
    Inferred,
    /// Written by consolidation. Never pruned.
    Consolidation,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::Inferred => "inferred",
            Self::Consolidation => "consolidation",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(Self::Explicit),
            "inferred" => Ok(Self::Inferred),
            "consolidation" => Ok(Self::Consolidation),
            _ => Err(format!("unknown source: {s}")),
        }
    }
}

/// What an embedding row indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Memory,
    Episode,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Episode => "episode",
        }
    }
}

/// A memory record, matching the `memory_entries` table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub scope: Scope,
    /// `None` for global memories.
    pub owner_id: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub content: String,
    /// Caller-assigned importance in `[0.0, 1.0]`.
    pub importance: f64,
    /// Strength as of `strength_updated_at`, in `[0.0, 1.0]`.
    pub strength: f64,
    /// Forgetting speed per day.
    pub decay_rate: f64,
    pub last_accessed_at: Option<String>,
    /// When `strength` was last recomputed. Decay is measured from here.
    pub strength_updated_at: Option<String>,
    pub access_count: u32,
    pub source: Source,
    pub created_at: String,
    pub updated_at: String,
    /// Bumped on every write; guards conditional updates.
    pub version: i64,
}

impl MemoryEntry {
    pub fn partition(&self) -> Partition {
        Partition {
            scope: self.scope,
            owner_id: self.owner_id.clone(),
        }
    }
}

/// Input to [`MemoryService::store`](crate::memory::service::MemoryService::store).
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub partition: Partition,
    pub memory_type: MemoryType,
    pub content: String,
    pub importance: f64,
    pub source: Source,
    /// Overrides the configured default forgetting speed.
    pub decay_rate: Option<f64>,
}

impl NewMemory {
    pub fn new(partition: Partition, memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            partition,
            memory_type,
            content: content.into(),
            importance: 0.5,
            source: Source::Explicit,
            decay_rate: None,
        }
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }

    pub fn decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = Some(decay_rate);
        self
    }
}

/// An undirected weighted edge, stored with `source_id < target_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryAssociation {
    pub source_id: String,
    pub target_id: String,
    pub weight: f64,
    pub created_at: String,
    pub updated_at: String,
}

impl MemoryAssociation {
    /// Order a pair of ids the way edges are stored.
    pub fn canonical<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }

    /// The endpoint opposite `id`, or `None` if `id` is not on this edge.
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.source_id == id {
            Some(&self.target_id)
        } else if self.target_id == id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

/// A narrative rollup of a time-bounded conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub owner_id: Option<String>,
    pub team_id: Option<String>,
    pub summary: String,
    pub topics: Vec<String>,
    pub decisions: Vec<String>,
    pub period_start: String,
    pub period_end: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub owner_id: Option<String>,
    pub team_id: Option<String>,
    pub summary: String,
    pub topics: Vec<String>,
    pub decisions: Vec<String>,
    pub period_start: String,
    pub period_end: String,
}

/// Text used to index an episode: the summary followed by its topics and decisions.
fn episode_text(summary: &str, topics: &[String], decisions: &[String]) -> String {
    let mut text = summary.to_string();
    if !topics.is_empty() {
        text.push_str("\nTopics: ");
        text.push_str(&topics.join(", "));
    }
    if !decisions.is_empty() {
        text.push_str("\nDecisions: ");
        text.push_str(&decisions.join("; "));
    }
    text
}

impl ConversationSummary {
    pub fn embedding_text(&self) -> String {
        episode_text(&self.summary, &self.topics, &self.decisions)
    }
}

impl NewEpisode {
    pub fn embedding_text(&self) -> String {
        episode_text(&self.summary, &self.topics, &self.decisions)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EpisodeHit {
    #[serde(flatten)]
    pub episode: ConversationSummary,
    pub similarity: f64,
}

/// A nearest-neighbor hit from the store.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entry: MemoryEntry,
    pub similarity: f64,
}

/// How a result entered the result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Origin {
    /// Direct vector match.
    Vector,
    /// Reached through the association graph.
    Association { hops: u32, via: String },
}

/// A search result with its per-signal breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntry {
    pub entry: MemoryEntry,
    /// Cosine similarity to the query; 0 for entries reached only through edges.
    pub similarity: f64,
    /// Effective (decayed) strength at query time.
    pub strength: f64,
    pub recency: f64,
    pub frequency: f64,
    pub score: f64,
    pub origin: Origin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_strings() {
        for scope in [Scope::Personal, Scope::Team, Scope::Global] {
            assert_eq!(scope.as_str().parse::<Scope>().unwrap(), scope);
        }
        for t in [
            MemoryType::Fact,
            MemoryType::Preference,
            MemoryType::SkillNote,
            MemoryType::Observation,
        ] {
            assert_eq!(t.to_string().parse::<MemoryType>().unwrap(), t);
        }
        assert_eq!("skill-note".parse::<MemoryType>().unwrap(), MemoryType::SkillNote);
        assert!("vibe".parse::<Source>().is_err());
    }

    #[test]
    fn partition_validates_ownership() {
        assert!(Partition::new(Scope::Global, None).is_ok());
        assert!(Partition::new(Scope::Global, Some("alice".into())).is_err());
        assert!(Partition::new(Scope::Personal, None).is_err());
        assert!(Partition::new(Scope::Team, Some("  ".into())).is_err());
        let p = Partition::new(Scope::Team, Some("core".into())).unwrap();
        assert_eq!(p.to_string(), "team:core");
    }

    #[test]
    fn association_helpers() {
        assert_eq!(MemoryAssociation::canonical("b", "a"), ("a", "b"));
        let edge = MemoryAssociation {
            source_id: "a".into(),
            target_id: "b".into(),
            weight: 0.5,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(edge.other("a"), Some("b"));
        assert_eq!(edge.other("b"), Some("a"));
        assert_eq!(edge.other("c"), None);
    }

    #[test]
    fn episode_embedding_text_includes_topics_and_decisions() {
        let ep = NewEpisode {
            owner_id: Some("alice".into()),
            team_id: None,
            summary: "Planned the launch".into(),
            topics: vec!["launch".into(), "pricing".into()],
            decisions: vec!["ship friday".into()],
            period_start: "2026-01-01T00:00:00Z".into(),
            period_end: "2026-01-01T01:00:00Z".into(),
        };
        let text = ep.embedding_text();
        assert!(text.starts_with("Planned the launch"));
        assert!(text.contains("launch, pricing"));
        assert!(text.contains("ship friday"));
    }
}
