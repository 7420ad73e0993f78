mod cli;
mod server;
mod tools;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnemos::config::MnemosConfig;

#[derive(Parser)]
#[command(name = "mnemos", version, about = "Associative long-term memory MCP server for AI agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (transport from config: stdio or http)
    Serve,
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Search memories from the terminal
    Search {
        /// Natural language query
        query: String,
        /// Partition scope: personal, team or global
        #[arg(long, default_value = "global")]
        scope: String,
        /// User or team id owning the partition
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Follow association links for several hops
        #[arg(long)]
        deep: bool,
        /// Count this search as a recall (strengthens the results)
        #[arg(long)]
        reinforce: bool,
    },
    /// Show memory statistics
    Stats,
    /// Show one memory with its scores, associations and history
    Inspect {
        id: String,
    },
    /// Run a consolidation cycle now
    Consolidate,
    /// Check database health
    Doctor,
    /// Regenerate every embedding with the configured model
    ReEmbed,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the embedding model to ~/.mnemos/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = MnemosConfig::load()?;

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => match config.server.transport.as_str() {
            "stdio" => server::serve_stdio(config).await?,
            "http" | "sse" => server::serve_http(config).await?,
            other => anyhow::bail!("unknown transport: {other}. Supported: stdio, http"),
        },
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
        Command::Search {
            query,
            scope,
            owner,
            limit,
            deep,
            reinforce,
        } => {
            let args = cli::search::SearchArgs {
                query,
                scope,
                owner,
                limit,
                deep,
                reinforce,
            };
            cli::search::search(config, args).await?;
        }
        Command::Stats => cli::stats::stats(&config)?,
        Command::Inspect { id } => cli::inspect::inspect(config, &id)?,
        Command::Consolidate => cli::consolidate::consolidate(&config)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::ReEmbed => cli::re_embed::re_embed(&config).await?,
    }

    Ok(())
}
