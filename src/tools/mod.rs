pub mod deep_search;
pub mod memory_inspect;
pub mod search_episodes;
pub mod search_memory;
pub mod store_episode;
pub mod store_memory;

use std::sync::Arc;

use deep_search::DeepSearchParams;
use memory_inspect::MemoryInspectParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use search_episodes::SearchEpisodesParams;
use search_memory::SearchMemoryParams;
use serde::Serialize;
use store_episode::StoreEpisodeParams;
use store_memory::StoreMemoryParams;

use mnemos::error::MemoryError;
use mnemos::memory::types::{NewEpisode, Partition, Scope};
use mnemos::memory::{AuxOutcome, SearchOptions, SearchOutcome};

use crate::server::Engine;

/// Upper bound on any tool's `limit`.
const MAX_LIMIT: usize = 50;
const MAX_HOPS: u32 = 4;

/// Build a partition from tool arguments.
pub(crate) fn parse_partition(scope: &str, owner_id: Option<String>) -> Result<Partition, String> {
    let scope: Scope = scope.parse()?;
    Partition::new(scope, owner_id).map_err(|e| e.to_string())
}

/// Error text handed back to the client. Transient failures say so, so an
/// agent knows a retry may succeed.
fn tool_error(op: &str, err: &MemoryError) -> String {
    if err.is_retryable() {
        format!("{op} failed (retryable): {err}")
    } else {
        format!("{op} failed: {err}")
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

/// The Mnemos MCP tool handler. Wraps the shared [`Engine`] and exposes all
/// MCP tools via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct MnemosTools {
    tool_router: ToolRouter<Self>,
    engine: Arc<Engine>,
}

impl MnemosTools {
    fn limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.engine.config.retrieval.default_limit)
            .min(MAX_LIMIT)
    }

    /// Run a synchronous engine call on the blocking pool.
    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&Engine) -> mnemos::error::Result<T> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || f(&engine))
            .await
            .map_err(|e| format!("{op} task failed: {e}"))?
            .map_err(|e| tool_error(op, &e))
    }

    /// Reinforce the results after responding. Recall reinforcement is
    /// best-effort, so the client never waits on it.
    fn reinforce_in_background(&self, outcome: &mut SearchOutcome, enabled: bool) {
        if !enabled {
            outcome.reinforcement = AuxOutcome::skipped("reinforcement disabled");
            return;
        }
        if outcome.results.is_empty() {
            return;
        }
        let ids = outcome.ids();
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            if let Err(e) = engine.memory.on_batch_recall(&ids) {
                tracing::warn!(error = %e, count = ids.len(), "background reinforcement failed");
            }
        });
        outcome.reinforcement = AuxOutcome::skipped("scheduled in background");
    }
}

#[tool_router]
impl MnemosTools {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
        }
    }

    /// Store a memory, merging it into a near-duplicate when one exists.
    #[tool(description = "Store a memory in a personal, team or global partition. Near-duplicates of an existing memory update it in place; new memories are linked to related ones.")]
    async fn store_memory(
        &self,
        Parameters(params): Parameters<StoreMemoryParams>,
    ) -> Result<String, String> {
        let new = params.into_new_memory(self.engine.config.store.default_importance)?;
        tracing::info!(
            content_len = new.content.len(),
            memory_type = %new.memory_type,
            partition = %new.partition,
            "store_memory called"
        );

        let outcome = self.blocking("store", move |e| e.memory.store(new)).await?;
        to_json(&outcome)
    }

    /// Hybrid search over one partition, or across the user's personal, team and global memories.
    #[tool(description = "Search memories by natural language. Ranks by meaning, strength, recency, frequency and importance, then pulls in strongly associated memories. Give `scope` (+ `owner_id`) for one partition, or `user_id` (+ `team_id`) to search personal, team and global memories together.")]
    async fn search_memory(
        &self,
        Parameters(params): Parameters<SearchMemoryParams>,
    ) -> Result<String, String> {
        let limit = self.limit(params.limit);
        let reinforce = self.engine.config.retrieval.reinforce_on_search;
        let options = SearchOptions::without_reinforcement();
        tracing::info!(query = %params.query, limit, "search_memory called");

        let escalate = params.escalates();
        let mut outcome = match params.scope {
            Some(scope) => {
                let partition = parse_partition(&scope, params.owner_id)?;
                let query = params.query;
                if escalate {
                    self.blocking("search", move |e| {
                        e.memory.recall(&query, &partition, limit, &options)
                    })
                    .await?
                } else {
                    self.blocking("search", move |e| {
                        e.memory.search(&query, &partition, limit, &options)
                    })
                    .await?
                }
            }
            None => {
                let user_id = params
                    .user_id
                    .ok_or("either `scope` or `user_id` is required")?;
                let team_id = params.team_id;
                let query = params.query;
                self.blocking("search", move |e| {
                    e.memory
                        .search_all_scopes(&query, &user_id, team_id.as_deref(), limit, &options)
                })
                .await?
            }
        };

        let enabled = reinforce || outcome.escalated;
        self.reinforce_in_background(&mut outcome, enabled);
        to_json(&outcome)
    }

    /// Multi-hop associative search over one partition.
    #[tool(description = "Deep associative search: runs a normal search, then follows association links for several hops to surface related memories the query alone would miss.")]
    async fn deep_search(
        &self,
        Parameters(params): Parameters<DeepSearchParams>,
    ) -> Result<String, String> {
        let partition = parse_partition(&params.scope, params.owner_id)?;
        let limit = self.limit(params.limit);
        let max_hops = params
            .max_hops
            .unwrap_or(self.engine.config.retrieval.max_hops)
            .min(MAX_HOPS);
        tracing::info!(query = %params.query, %partition, limit, max_hops, "deep_search called");

        let query = params.query;
        let options = SearchOptions::without_reinforcement();
        let mut outcome = self
            .blocking("deep search", move |e| {
                e.memory.deep_search(&query, &partition, limit, max_hops, &options)
            })
            .await?;
        self.reinforce_in_background(&mut outcome, true);
        to_json(&outcome)
    }

    /// Record a conversation summary.
    #[tool(description = "Record a summary of a finished conversation (topics, decisions, time window) for later episodic search.")]
    async fn store_episode(
        &self,
        Parameters(params): Parameters<StoreEpisodeParams>,
    ) -> Result<String, String> {
        let new: NewEpisode = params.into();
        tracing::info!(topics = new.topics.len(), "store_episode called");
        let episode = self
            .blocking("store episode", move |e| e.memory.record_episode(new))
            .await?;
        to_json(&episode)
    }

    #[tool(description = "Search past conversation summaries belonging to a user or a team.")]
    async fn search_episodes(
        &self,
        Parameters(params): Parameters<SearchEpisodesParams>,
    ) -> Result<String, String> {
        let limit = self.limit(params.limit);
        tracing::info!(query = %params.query, limit, "search_episodes called");
        let SearchEpisodesParams {
            query,
            user_id,
            team_id,
            ..
        } = params;
        let hits = self
            .blocking("episode search", move |e| {
                e.memory
                    .search_episodic(&query, user_id.as_deref(), team_id.as_deref(), limit)
            })
            .await?;
        to_json(&serde_json::json!({ "total": hits.len(), "episodes": hits }))
    }

    /// Run a consolidation cycle now.
    #[tool(description = "Run memory consolidation now: persist decay, prune forgotten memories, merge duplicates and clean up weak associations. Returns a report.")]
    async fn consolidate(&self) -> Result<String, String> {
        tracing::info!("consolidate called");
        let engine = Arc::clone(&self.engine);
        let report = tokio::task::spawn_blocking(move || engine.consolidation.consolidate())
            .await
            .map_err(|e| format!("consolidation task failed: {e}"))?;
        to_json(&report)
    }

    #[tool(description = "Memory store statistics: counts by scope, type and source, associations, episodes and storage size.")]
    async fn memory_stats(&self) -> Result<String, String> {
        tracing::info!("memory_stats called");
        let stats = self
            .blocking("stats", |e| e.memory.repository().stats())
            .await?;
        to_json(&stats)
    }

    /// Inspect one memory with its live scores, associations and audit trail.
    #[tool(description = "Inspect a memory by ID: content, current decayed strength, associated memories and change history.")]
    async fn memory_inspect(
        &self,
        Parameters(params): Parameters<MemoryInspectParams>,
    ) -> Result<String, String> {
        tracing::info!(id = %params.id, "memory_inspect called");
        let id = params.id;
        let inspection = self
            .blocking("inspect", move |e| e.memory.inspect(&id))
            .await?;
        to_json(&inspection)
    }
}

#[tool_handler]
impl ServerHandler for MnemosTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Mnemos is an associative long-term memory. Use store_memory to save facts \
                 and preferences, search_memory or deep_search to recall them, and \
                 store_episode/search_episodes for conversation summaries."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
