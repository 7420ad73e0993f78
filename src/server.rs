//! MCP server initialization for stdio and streamable HTTP transports.
//!
//! [`open_engine`] wires the database, embedding provider and services into an
//! [`Engine`]; [`serve_stdio`] and [`serve_http`] put the MCP tool handler in
//! front of it and start the consolidation scheduler.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rmcp::ServiceExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use mnemos::config::MnemosConfig;
use mnemos::db;
use mnemos::embedding::{self, EmbeddingProvider};
use mnemos::memory::sqlite::SqliteRepository;
use mnemos::memory::{ConsolidationService, MemoryRepository, MemoryService};

use crate::tools::MnemosTools;

/// Everything a request handler needs, constructed once per process.
pub struct Engine {
    pub memory: MemoryService,
    pub consolidation: ConsolidationService,
    pub config: MnemosConfig,
}

/// Open the database, create the embedding provider and build the services.
pub fn open_engine(config: MnemosConfig) -> Result<Arc<Engine>> {
    let db_path = config.resolved_db_path();
    let repo = SqliteRepository::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    tracing::info!(db = %db_path.display(), "database ready");

    let provider = embedding::create_provider(&config.embedding)?;
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(provider);
    tracing::info!(provider = %config.embedding.provider, "embedding provider ready");

    warn_on_model_mismatch(&repo, &config, embedder.dimensions())?;

    let repo: Arc<dyn MemoryRepository> = Arc::new(repo);
    Ok(Arc::new(Engine {
        memory: MemoryService::new(Arc::clone(&repo), embedder, &config),
        consolidation: ConsolidationService::new(repo, &config),
        config,
    }))
}

fn warn_on_model_mismatch(
    repo: &SqliteRepository,
    config: &MnemosConfig,
    dimensions: usize,
) -> Result<()> {
    let conn = repo.connection()?;
    if let Some(stored) = db::migrations::get_embedding_model(&conn)? {
        if stored != config.embedding.model {
            tracing::warn!(
                stored = %stored,
                configured = %config.embedding.model,
                "embedding model changed, run `mnemos re-embed` to update all vectors"
            );
        }
    }
    if let Some(stored) = db::migrations::get_embedding_dimensions(&conn)? {
        if stored != dimensions {
            tracing::warn!(
                stored,
                provider = dimensions,
                "embedding width changed; existing entries are invisible to search until re-embedded"
            );
        }
    }
    Ok(())
}

/// Run consolidation every `interval_hours` on a blocking thread. `None` when disabled.
pub fn spawn_consolidation(engine: Arc<Engine>) -> Option<JoinHandle<()>> {
    let settings = engine.consolidation.config();
    if !settings.enabled {
        tracing::info!("scheduled consolidation disabled");
        return None;
    }
    let period = Duration::from_secs(settings.interval_hours * 3600);
    tracing::info!(interval_hours = settings.interval_hours, "consolidation scheduled");

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately; don't consolidate at startup
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let engine = Arc::clone(&engine);
            if let Err(e) =
                tokio::task::spawn_blocking(move || engine.consolidation.consolidate()).await
            {
                tracing::warn!(error = %e, "consolidation task aborted");
            }
        }
    }))
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: MnemosConfig) -> Result<()> {
    tracing::info!("starting Mnemos MCP server on stdio");

    let engine = open_engine(config)?;
    let scheduler = spawn_consolidation(Arc::clone(&engine));

    let tools = MnemosTools::new(engine);
    let server = tools.serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    if let Some(handle) = scheduler {
        handle.abort();
    }
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP transport.
pub async fn serve_http(config: MnemosConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting Mnemos MCP server on HTTP");

    let engine = open_engine(config)?;
    let scheduler = spawn_consolidation(Arc::clone(&engine));

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(MnemosTools::new(Arc::clone(&engine))),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    if let Some(handle) = scheduler {
        handle.abort();
    }
    Ok(())
}
