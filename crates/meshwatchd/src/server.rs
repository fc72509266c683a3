//! HTTP server for meshwatchd

use crate::metrics::CollectorMetrics;
use crate::routes;
use anyhow::{Context, Result};
use axum::Router;
use meshwatch_common::graph::GraphGenerator;
use meshwatch_common::snapshot::NodesGenerator;
use meshwatch_common::NodeStore;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
pub struct AppState {
    pub store: Arc<dyn NodeStore>,
    pub graph: Arc<GraphGenerator>,
    pub nodes: Arc<NodesGenerator>,
    pub metrics: Arc<CollectorMetrics>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::entity_routes())
        .merge(routes::meshviewer_routes())
        .merge(routes::metrics_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind the HTTP listener. Called before any background work starts so a
/// taken port fails startup.
pub async fn bind(listen: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", listen))?;
    info!("Listening on http://{}", listen);
    Ok(listener)
}

/// Serve on `listener` until `shutdown` resolves.
pub async fn run<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_fails_on_taken_port() {
        let taken = bind("127.0.0.1:0").await.unwrap();
        let address = taken.local_addr().unwrap().to_string();

        let err = bind(&address).await.unwrap_err();
        assert!(format!("{:#}", err).contains(&address));
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        assert!(bind("not-an-address").await.is_err());
    }
}
