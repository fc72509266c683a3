//! HTTP routes: raw store entities, cached meshviewer views and metrics.

use crate::server::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use meshwatch_common::model::{Neighbours, NodeInfo, NodeStatus, Statistics};
use meshwatch_common::{NodeStore, StoreError, StoreResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

type AppStateArc = Arc<AppState>;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn api_error(e: StoreError) -> ApiError {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        error!("Store request failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(ErrorBody { error: e.to_string() }))
}

/// Run a store read on the blocking pool; engines do synchronous I/O.
async fn query<T, F>(state: &AppStateArc, read: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn NodeStore) -> StoreResult<T> + Send + 'static,
{
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || read(store.as_ref())).await {
        Ok(result) => result.map(Json).map_err(api_error),
        Err(e) => {
            error!("Store request panicked: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: "internal error".to_string(),
                }),
            ))
        }
    }
}

// ============================================================================
// Entity Routes
// ============================================================================

pub fn entity_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/nodeinfos", get(list_nodeinfos))
        .route("/nodeinfos/:id", get(get_nodeinfo))
        .route("/statistics", get(list_statistics))
        .route("/statistics/:id", get(get_statistics))
        .route("/neighbours", get(list_neighbours))
        .route("/neighbours/:id", get(get_neighbours))
        .route("/nodestatus", get(list_statuses))
        .route("/nodestatus/:id", get(get_status))
}

async fn list_nodeinfos(State(state): State<AppStateArc>) -> ApiResult<Vec<NodeInfo>> {
    query(&state, |store| store.all_nodeinfos()).await
}

async fn get_nodeinfo(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<NodeInfo> {
    query(&state, move |store| store.get_nodeinfo(&id)).await
}

async fn list_statistics(State(state): State<AppStateArc>) -> ApiResult<Vec<Statistics>> {
    query(&state, |store| store.all_statistics()).await
}

async fn get_statistics(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<Statistics> {
    query(&state, move |store| store.get_statistics(&id)).await
}

async fn list_neighbours(State(state): State<AppStateArc>) -> ApiResult<Vec<Neighbours>> {
    query(&state, |store| store.all_neighbours()).await
}

async fn get_neighbours(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<Neighbours> {
    query(&state, move |store| store.get_neighbours(&id)).await
}

async fn list_statuses(State(state): State<AppStateArc>) -> ApiResult<Vec<NodeStatus>> {
    query(&state, |store| store.all_statuses()).await
}

async fn get_status(
    State(state): State<AppStateArc>,
    Path(id): Path<String>,
) -> ApiResult<NodeStatus> {
    query(&state, move |store| store.get_status(&id)).await
}

// ============================================================================
// Meshviewer Routes
// ============================================================================

/// Both documents are served from the last regeneration.
pub fn meshviewer_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/graph.json", get(graph_json))
        .route("/nodes.json", get(nodes_json))
}

async fn graph_json(State(state): State<AppStateArc>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.graph.cached(),
    )
}

async fn nodes_json(State(state): State<AppStateArc>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.nodes.cached(),
    )
}

// ============================================================================
// Metrics Routes
// ============================================================================

pub fn metrics_routes() -> Router<AppStateArc> {
    Router::new().route("/metrics", get(metrics))
}

async fn metrics(State(state): State<AppStateArc>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export(),
    )
}
