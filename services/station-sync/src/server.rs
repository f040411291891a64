//! Status server for station sync.
//!
//! - `GET /health` - Health check
//! - `GET /status` - Merge cache and listener counters
//! - `GET /metrics` - Prometheus metrics

use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use station_cache::{MergeCache, MergeCacheStatsSnapshot};

use crate::listener::{ListenerStats, ListenerStatsSnapshot};

pub struct ServerState {
    pub cache: Arc<MergeCache>,
    pub listeners: Arc<ListenerStats>,
    pub origins: Vec<String>,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub origins: Vec<String>,
    pub cache: MergeCacheStatsSnapshot,
    pub listeners: ListenerStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    Json(StatusResponse {
        origins: state.origins.clone(),
        cache: state.cache.stats(),
        listeners: state.listeners.snapshot(),
    })
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "station-sync".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn metrics_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::OK, String::new()),
    }
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Starting station sync status server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
