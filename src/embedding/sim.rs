//! Deterministic hashing embedding provider.
//!
//! Every lowercase word of the input is hashed into one of [`EMBEDDING_DIM`]
//! buckets with a hashed sign, and the bag is L2-normalized. Texts sharing
//! words get proportionally similar vectors; identical texts get identical
//! vectors. No model files, no network.
//!
//! Tests can pin exact vectors for chosen texts with [`SimEmbeddingProvider::pin`]
//! and simulate an outage with [`SimEmbeddingProvider::set_unavailable`].

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;

use super::{l2_normalize, EmbeddingProvider, EMBEDDING_DIM};

#[derive(Debug, Default)]
pub struct SimEmbeddingProvider {
    pinned: Mutex<HashMap<String, Vec<f32>>>,
    unavailable: AtomicBool,
    calls: AtomicUsize,
}

impl SimEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `text` embed to exactly `vector` (normalized).
    pub fn pin(&self, text: &str, vector: &[f32]) {
        if let Ok(mut pinned) = self.pinned.lock() {
            pinned.insert(text.to_string(), l2_normalize(vector));
        }
    }

    /// While set, every `embed` call fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `embed` calls served so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn bucket(word: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        let h = hasher.finish();
        let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
        (((h >> 1) % EMBEDDING_DIM as u64) as usize, sign)
    }

    fn hash_embedding(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        let mut any = false;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let (idx, sign) = Self::bucket(&word.to_lowercase());
            v[idx] += sign;
            any = true;
        }
        if !any {
            // keep empty input on the unit sphere
            v[0] = 1.0;
        }
        l2_normalize(&v)
    }
}

impl EmbeddingProvider for SimEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        anyhow::ensure!(
            !self.unavailable.load(Ordering::SeqCst),
            "embedding provider unavailable"
        );
        let pinned = self
            .pinned
            .lock()
            .map_err(|e| anyhow::anyhow!("pin table poisoned: {e}"))?
            .get(text)
            .cloned();
        Ok(pinned.unwrap_or_else(|| Self::hash_embedding(text)))
    }
}
