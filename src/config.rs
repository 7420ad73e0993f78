use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MnemosConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub store: StoreConfig,
    pub decay: DecayConfig,
    pub consolidation: ConsolidationConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
}

/// Relative weight of each ranking signal in the hybrid score.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct ScoreWeights {
    pub similarity: f64,
    pub strength: f64,
    pub frequency: f64,
    pub recency: f64,
    pub importance: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_limit: usize,
    /// Candidates fetched per requested result, before re-ranking.
    pub candidate_multiplier: usize,
    pub max_candidates: usize,
    pub weights: ScoreWeights,
    /// Per-hop damping applied to activation spread over association edges.
    pub damping: f64,
    /// Below this top score `recall` escalates to a deep search.
    pub confident_score: f64,
    pub max_hops: u32,
    /// Share of a deep-search neighbor's score taken from propagated activation.
    pub propagation_share: f64,
    pub personal_share: f64,
    pub team_share: f64,
    pub global_share: f64,
    pub reinforce_on_search: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub reconsolidation_threshold: f64,
    pub link_threshold: f64,
    pub link_candidates: usize,
    pub link_weight_floor: f64,
    /// Forgetting speed per day for new entries.
    pub default_decay_rate: f64,
    pub default_importance: f64,
    pub max_write_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecayConfig {
    pub recency_half_life_days: f64,
    /// Access count at which the frequency score reaches ~63%.
    pub frequency_saturation: f64,
    /// Fraction of the remaining headroom to 1.0 restored by one recall.
    pub recall_boost: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub enabled: bool,
    pub interval_hours: u64,
    pub forgotten_threshold: f64,
    pub protected_importance: f64,
    pub dedup_threshold: f64,
    pub access_weight: f64,
    pub merge_strength_boost: f64,
    /// Multiplier applied to every association weight per cycle.
    pub association_decay: f64,
    pub min_association_weight: f64,
    /// Audit rows of deleted memories older than this are dropped. 0 keeps them forever.
    pub audit_retention_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 8716,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_mnemos_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self { db_path }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_mnemos_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            cache_dir,
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            similarity: 0.45,
            strength: 0.20,
            frequency: 0.15,
            recency: 0.10,
            importance: 0.10,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            candidate_multiplier: 4,
            max_candidates: 100,
            weights: ScoreWeights::default(),
            damping: 0.5,
            confident_score: 0.55,
            max_hops: 2,
            propagation_share: 0.6,
            personal_share: 0.4,
            team_share: 0.3,
            global_share: 0.3,
            reinforce_on_search: true,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reconsolidation_threshold: 0.92,
            link_threshold: 0.75,
            link_candidates: 5,
            link_weight_floor: 0.3,
            default_decay_rate: 0.05,
            default_importance: 0.5,
            max_write_retries: 3,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            recency_half_life_days: 7.0,
            frequency_saturation: 5.0,
            recall_boost: 0.2,
        }
    }
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_hours: 24,
            forgotten_threshold: 0.05,
            protected_importance: 0.8,
            dedup_threshold: 0.95,
            access_weight: 0.01,
            merge_strength_boost: 0.1,
            association_decay: 0.98,
            min_association_weight: 0.1,
            audit_retention_days: 90,
        }
    }
}

/// Returns `~/.mnemos/`
pub fn default_mnemos_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mnemos")
}

/// Returns the default config file path: `~/.mnemos/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnemos_dir().join("config.toml")
}

impl MnemosConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemosConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides (MNEMOS_DB, MNEMOS_TRANSPORT, MNEMOS_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMOS_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMOS_TRANSPORT") {
            self.server.transport = val;
        }
        if let Ok(val) = std::env::var("MNEMOS_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Reject threshold combinations the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let store = &self.store;
        anyhow::ensure!(
            store.link_threshold < store.reconsolidation_threshold,
            "store.link_threshold ({}) must be below store.reconsolidation_threshold ({})",
            store.link_threshold,
            store.reconsolidation_threshold
        );
        anyhow::ensure!(
            self.consolidation.dedup_threshold >= store.reconsolidation_threshold,
            "consolidation.dedup_threshold must not be looser than store.reconsolidation_threshold"
        );
        anyhow::ensure!(
            store.default_decay_rate > 0.0,
            "store.default_decay_rate must be positive"
        );
        anyhow::ensure!(
            self.retrieval.damping > 0.0 && self.retrieval.damping < 1.0,
            "retrieval.damping must be in (0, 1)"
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.retrieval.propagation_share),
            "retrieval.propagation_share must be in [0, 1]"
        );
        anyhow::ensure!(
            self.decay.recency_half_life_days > 0.0 && self.decay.frequency_saturation > 0.0,
            "decay half-life and frequency saturation must be positive"
        );
        anyhow::ensure!(
            self.consolidation.interval_hours > 0,
            "consolidation.interval_hours must be at least 1"
        );
        Ok(())
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
