//! Shared fixtures for the service unit tests.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::in_memory::InMemoryRepository;
use super::repository::MemoryRepository;
use super::service::MemoryService;
use super::types::{MemoryEntry, MemoryType, Partition, Source};
use crate::config::MnemosConfig;
use crate::embedding::sim::SimEmbeddingProvider;
use crate::embedding::EMBEDDING_DIM;

pub struct Fixture {
    pub service: MemoryService,
    pub embedder: Arc<SimEmbeddingProvider>,
    pub repo: Arc<InMemoryRepository>,
}

pub fn fixture() -> Fixture {
    fixture_with(MnemosConfig::default())
}

pub fn fixture_with(config: MnemosConfig) -> Fixture {
    let embedder = Arc::new(SimEmbeddingProvider::new());
    let repo = Arc::new(InMemoryRepository::new());
    let service = MemoryService::new(repo.clone(), embedder.clone(), &config);
    Fixture {
        service,
        embedder,
        repo,
    }
}

/// Unit vector along `axis`.
pub fn axis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[axis] = 1.0;
    v
}

/// Unit vector whose cosine similarity to `axis(base)` is exactly `similarity`,
/// tilted toward `axis(toward)`.
pub fn tilted(base: usize, toward: usize, similarity: f64) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[base] = similarity as f32;
    v[toward] = (1.0 - similarity * similarity).sqrt() as f32;
    v
}

/// A fresh entry that has not been written anywhere.
pub fn entry_template(partition: &Partition, content: &str, created_at: DateTime<Utc>) -> MemoryEntry {
    MemoryEntry {
        id: uuid::Uuid::now_v7().to_string(),
        scope: partition.scope,
        owner_id: partition.owner_id.clone(),
        memory_type: MemoryType::Fact,
        content: content.into(),
        importance: 0.5,
        strength: 1.0,
        decay_rate: 0.05,
        last_accessed_at: None,
        strength_updated_at: None,
        access_count: 0,
        source: Source::Explicit,
        created_at: created_at.to_rfc3339(),
        updated_at: created_at.to_rfc3339(),
        version: 1,
    }
}

/// An entry written straight into the repository, bypassing the store path.
pub fn seed_entry(
    repo: &dyn MemoryRepository,
    partition: &Partition,
    content: &str,
    vector: &[f32],
    created_at: DateTime<Utc>,
) -> MemoryEntry {
    let entry = entry_template(partition, content, created_at);
    repo.insert_entry(&entry, vector).unwrap();
    entry
}
