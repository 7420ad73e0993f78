//! Associative long-term memory for AI agents, served over MCP.
//!
//! Mnemos stores facts and preferences as scored entries that decay over time,
//! retrieves them by a hybrid of semantic similarity, strength, recency,
//! frequency and importance, spreads relevance through a learned association
//! graph, and periodically consolidates the store so it stays small and useful.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for partition-filtered cosine search, behind the
//!   [`MemoryRepository`](memory::MemoryRepository) trait. An in-memory
//!   implementation ships for tests and embedders.
//! - **Embeddings**: local ONNX Runtime with all-MiniLM-L6-v2 (384 dimensions)
//! - **Ranking**: weighted blend of five signals, then one-hop spreading
//!   activation over association edges; deep search follows several hops
//! - **Maintenance**: decay persistence, pruning, duplicate merging and edge
//!   cleanup on a timer
//! - **Transport**: MCP over stdio (primary) or Streamable HTTP
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite connection setup, schema, migrations and health checks
//! - [`embedding`]: Text-to-vector providers
//! - [`error`]: The engine's error type
//! - [`memory`]: Core engine: store, search, activation, episodes, consolidation

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod memory;
