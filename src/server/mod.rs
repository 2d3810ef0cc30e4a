//! HTTP surface: `POST /upload-folder`, `POST /semantic-search` and
//! `GET /health`.

mod handlers;
mod router;

pub use router::build_router;

use crate::config::Config;
use crate::index::Indexer;
use crate::search::QueryService;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub indexer: Arc<Indexer>,
    pub search: Arc<QueryService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(indexer: Indexer, search: QueryService) -> Self {
        Self {
            indexer: Arc::new(indexer),
            search: Arc::new(search),
            started_at: Instant::now(),
        }
    }
}

/// Serve until Ctrl-C
pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    if config.server.host == "0.0.0.0" {
        warn!("Binding to 0.0.0.0; the API has no authentication");
    }

    let router = build_router(state, config.server.max_body_mb * 1024 * 1024);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
