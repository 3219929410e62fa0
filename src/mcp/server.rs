//! MCP server setup using `rmcp` with stdio transport.
//!
//! Provides `McpContext` (shared state, also used by the CLI) and
//! `McpServer` (startup logic).
use crate::mcp::tools::AppTools;
use anyhow::{Context, Result};
use rmcp::{ServiceExt, handler::server::router::Router, transport::io::stdio};
use std::sync::Arc;
use tracing::{info, warn};

use crate::chat::Answerer;
use crate::config::Config;
use crate::db::SqliteStore;
use crate::embedder::{self, Embedder};
use crate::generator::{self, Generator, UnavailableGenerator};
use crate::indexer::Indexer;

/// Shared application context available to all tool handlers.
#[derive(Clone)]
pub struct McpContext {
    pub config: Arc<Config>,
    pub store: Arc<SqliteStore>,
    pub indexer: Arc<Indexer>,
    pub answerer: Arc<Answerer>,
}

impl McpContext {
    /// Wire store, providers, pipeline and answerer from configuration.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(
            SqliteStore::open(&config.db_path, config.embedding.dimensions)
                .context("Failed to open database")?,
        );
        let embedder = embedder::create_embedder(&config.embedding)
            .context("Failed to configure embedding provider")?;

        // Without a generation provider, ingestion and history still work
        let generator: Arc<dyn Generator> = match generator::create_generator(&config.generation) {
            Ok(g) => g,
            Err(e) => {
                warn!("Generation provider unavailable: {e}");
                Arc::new(UnavailableGenerator::new(e.to_string()))
            }
        };

        Ok(Self::from_parts(config, store, embedder, generator))
    }

    pub fn from_parts(
        config: Config,
        store: Arc<SqliteStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let indexer = Indexer::new(&config, Arc::clone(&embedder), store.clone());
        let answerer = Answerer::new(&config, embedder, store.clone(), store.clone(), generator);
        Self {
            config: Arc::new(config),
            store,
            indexer: Arc::new(indexer),
            answerer: Arc::new(answerer),
        }
    }
}

/// MCP Server wrapping the context and serving via stdio.
#[derive(Clone)]
pub struct McpServer {
    pub ctx: McpContext,
}

impl McpServer {
    pub fn new(ctx: McpContext) -> Self {
        Self { ctx }
    }

    /// Start the MCP server on stdio transport (blocks until the client disconnects).
    pub async fn start(self) -> Result<()> {
        info!("Starting MCP server on stdio...");
        let (stdin, stdout) = stdio();

        let app_tools = AppTools::new(self.ctx.clone());
        let router = Router::new(app_tools.clone()).with_tools(app_tools.tool_router.clone());

        let service = router
            .serve((stdin, stdout))
            .await
            .context("MCP Server encountered an error during stdio transport")?;
        service
            .waiting()
            .await
            .context("MCP Server stopped unexpectedly")?;

        Ok(())
    }
}
