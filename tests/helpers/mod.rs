#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mnemos::config::MnemosConfig;
use mnemos::embedding::sim::SimEmbeddingProvider;
use mnemos::embedding::EMBEDDING_DIM;
use mnemos::memory::sqlite::SqliteRepository;
use mnemos::memory::types::{MemoryEntry, MemoryType, Partition, Source};
use mnemos::memory::{ConsolidationService, MemoryRepository, MemoryService};
use tempfile::TempDir;

/// A file-backed database in a temp dir with services wired the way the
/// server wires them, but with the deterministic embedder.
pub struct Harness {
    pub dir: TempDir,
    pub repo: Arc<SqliteRepository>,
    pub embedder: Arc<SimEmbeddingProvider>,
    pub service: MemoryService,
    pub consolidation: ConsolidationService,
}

pub fn harness() -> Harness {
    harness_with(MnemosConfig::default())
}

pub fn harness_with(config: MnemosConfig) -> Harness {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(SqliteRepository::open(dir.path().join("memory.db")).unwrap());
    let embedder = Arc::new(SimEmbeddingProvider::new());
    let service = MemoryService::new(repo.clone(), embedder.clone(), &config);
    let consolidation = ConsolidationService::new(repo.clone(), &config);
    Harness {
        dir,
        repo,
        embedder,
        service,
        consolidation,
    }
}

/// Unit vector along `axis`.
pub fn axis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[axis] = 1.0;
    v
}

/// Unit vector with cosine `similarity` to `axis(base)`, leaning toward `axis(toward)`.
pub fn tilted(base: usize, toward: usize, similarity: f64) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[base] = similarity as f32;
    v[toward] = (1.0 - similarity * similarity).sqrt() as f32;
    v
}

/// An unsaved entry at full strength.
pub fn entry(partition: &Partition, content: &str, created_at: DateTime<Utc>) -> MemoryEntry {
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

/// Insert an entry directly, bypassing the store path (no reconsolidation, no linking).
pub fn seed(repo: &dyn MemoryRepository, entry: MemoryEntry, vector: &[f32]) -> MemoryEntry {
    repo.insert_entry(&entry, vector).unwrap();
    entry
}
