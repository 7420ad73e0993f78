//! CLI `re-embed` command: regenerate all embeddings with the current model.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use mnemos::config::MnemosConfig;
use mnemos::db;
use mnemos::embedding::{self, EmbeddingProvider};
use mnemos::memory::sqlite::SqliteRepository;
use mnemos::memory::types::EntryKind;
use mnemos::memory::MemoryRepository;

const BATCH_SIZE: usize = 32;

/// Re-embed every memory and episode with the configured model, then record
/// the model name and width.
pub async fn re_embed(config: &MnemosConfig) -> Result<()> {
    let repo = Arc::new(
        SqliteRepository::open(config.resolved_db_path()).context("failed to open database")?,
    );
    let provider: Arc<dyn EmbeddingProvider> = Arc::from(
        embedding::create_provider(&config.embedding)
            .context("failed to create embedding provider")?,
    );

    let mut work: Vec<(String, EntryKind, String)> = repo
        .list_entries(None)?
        .into_iter()
        .map(|e| (e.id, EntryKind::Memory, e.content))
        .collect();
    work.extend(
        repo.list_episodes()?
            .into_iter()
            .map(|ep| {
                let text = ep.embedding_text();
                (ep.id, EntryKind::Episode, text)
            }),
    );

    let total = work.len();
    if total == 0 {
        println!("Nothing to re-embed.");
    } else {
        println!(
            "Re-embedding {total} entries with model '{}'...",
            config.embedding.model
        );

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")?
                .progress_chars("##-"),
        );

        for chunk in work.chunks(BATCH_SIZE) {
            let batch = chunk.to_vec();
            let provider = Arc::clone(&provider);
            let repo = Arc::clone(&repo);

            tokio::task::spawn_blocking(move || -> Result<()> {
                let texts: Vec<&str> = batch.iter().map(|(_, _, text)| text.as_str()).collect();
                let embeddings = provider.embed_batch(&texts).context("embedding batch failed")?;
                for ((id, kind, _), emb) in batch.iter().zip(&embeddings) {
                    repo.replace_embedding(id, *kind, emb)?;
                }
                Ok(())
            })
            .await??;

            pb.inc(chunk.len() as u64);
        }

        pb.finish_and_clear();
    }

    {
        let conn = repo.connection()?;
        db::migrations::set_embedding_model(&conn, &config.embedding.model, provider.dimensions())?;
    }

    println!(
        "Re-embedded {total} entries with model '{}' ({} dims).",
        config.embedding.model,
        provider.dimensions()
    );
    Ok(())
}
