//! HTTP server for the query interface

use crate::metrics::PipelineMetrics;
use crate::pipeline::ReadingCache;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub cache: Arc<dyn ReadingCache>,
    pub metrics: Arc<PipelineMetrics>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(cache: Arc<dyn ReadingCache>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            cache,
            metrics,
            start_time: Instant::now(),
        }
    }
}

/// Build the router with every query route
pub fn router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::reading_routes())
        .merge(routes::metrics_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind the query listener; fails fast on a bad or busy address
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind query interface on {}", addr))
}

/// Serve until `shutdown` is cancelled
pub async fn run(listener: TcpListener, state: AppState, shutdown: CancellationToken) -> Result<()> {
    let app = router(state);

    if let Ok(addr) = listener.local_addr() {
        info!("query interface listening on http://{}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("query interface failed")?;

    info!("query interface stopped");
    Ok(())
}
