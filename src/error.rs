//! Error type for the memory engine.
//!
//! Engine operations return [`Result`]. Binary-level code (CLI, server, config)
//! keeps using `anyhow`, which absorbs [`MemoryError`] through `?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    /// The embedding provider failed. Usually transient.
    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("memory not found: {0}")]
    NotFound(String),

    /// An optimistic write kept losing to concurrent writers.
    #[error("write conflict on {0}")]
    Conflict(String),

    #[error("lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl MemoryError {
    pub fn embedding(err: anyhow::Error) -> Self {
        Self::Embedding(format!("{err:#}"))
    }

    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Embedding(_) | Self::Storage(_) | Self::Conflict(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
