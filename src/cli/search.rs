use anyhow::Result;

use mnemos::config::MnemosConfig;
use mnemos::memory::types::{Origin, Partition, Scope};
use mnemos::memory::SearchOptions;

use crate::server::open_engine;

pub struct SearchArgs {
    pub query: String,
    pub scope: String,
    pub owner: Option<String>,
    pub limit: Option<usize>,
    pub deep: bool,
    pub reinforce: bool,
}

/// Run a search from the terminal. Does not count as a recall unless asked.
pub async fn search(config: MnemosConfig, args: SearchArgs) -> Result<()> {
    let scope: Scope = args.scope.parse().map_err(anyhow::Error::msg)?;
    let partition = Partition::new(scope, args.owner)?;
    let limit = args.limit.unwrap_or(config.retrieval.default_limit);
    let max_hops = config.retrieval.max_hops;
    let options = SearchOptions {
        reinforce: Some(args.reinforce),
        ..SearchOptions::default()
    };

    let engine = open_engine(config)?;
    let query = args.query;
    let deep = args.deep;
    let outcome = tokio::task::spawn_blocking(move || {
        let memory = &engine.memory;
        if deep {
            memory.deep_search(&query, &partition, limit, max_hops, &options)
        } else {
            memory.search(&query, &partition, limit, &options)
        }
    })
    .await??;

    if outcome.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", outcome.results.len());

    for (i, result) in outcome.results.iter().enumerate() {
        let preview: String = if result.entry.content.chars().count() > 120 {
            let head: String = result.entry.content.chars().take(120).collect();
            format!("{head}...")
        } else {
            result.entry.content.clone()
        };
        let origin = match &result.origin {
            Origin::Vector => "match".to_string(),
            Origin::Association { hops, .. } => format!("{hops} hop(s) away"),
        };

        println!(
            "  {}. [{}] {} (score: {:.4}, similarity: {:.3}, strength: {:.2}, {origin})",
            i + 1,
            result.entry.memory_type,
            result.entry.id,
            result.score,
            result.similarity,
            result.strength,
        );
        println!("     {preview}");
        println!();
    }

    if outcome.expansion.is_failed() {
        println!("Note: association expansion failed; results are vector matches only.");
    }

    Ok(())
}
