//! HTTP server for the ingress router.
//!
//! Provides endpoints for:
//! - `POST /ingress` - Accept a payload using the header or default provider
//! - `POST /ingress/:route` - Accept a payload on a configured route
//! - `GET /status` - Per-channel counters since start
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics

use axum::{
    extract::{DefaultBodyLimit, Extension, Json, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use ingress::{route_message, Channel, MessageContext, RoutingKey};
use storage::ChannelPublisher;

use crate::config::{RouteConfig, RouterConfig};

/// Shared state for the HTTP server.
pub struct ServerState {
    pub config: RouterConfig,
    pub publisher: Arc<dyn ChannelPublisher>,
    pub stats: RouterStats,
    /// Present when a global Prometheus recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl ServerState {
    pub fn new(config: RouterConfig, publisher: Arc<dyn ChannelPublisher>) -> Self {
        Self {
            config,
            publisher,
            stats: RouterStats::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Counters since process start.
pub struct RouterStats {
    started_at: DateTime<Utc>,
    main: AtomicU64,
    fast_path: AtomicU64,
    dead_letter: AtomicU64,
    invalid_provider: AtomicU64,
    publish_failures: AtomicU64,
}

impl RouterStats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            main: AtomicU64::new(0),
            fast_path: AtomicU64::new(0),
            dead_letter: AtomicU64::new(0),
            invalid_provider: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }
    }

    fn channel_counter(&self, channel: Channel) -> &AtomicU64 {
        match channel {
            Channel::Main => &self.main,
            Channel::FastPath => &self.fast_path,
            Channel::DeadLetter => &self.dead_letter,
        }
    }

    pub fn snapshot(&self) -> StatusResponse {
        let channels = Channel::ALL
            .iter()
            .map(|c| (c.as_str().to_string(), self.channel_counter(*c).load(Ordering::Relaxed)))
            .collect();

        StatusResponse {
            started_at: self.started_at,
            channels,
            invalid_provider: self.invalid_provider.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }
}

/// Response for /status endpoint.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub started_at: DateTime<Utc>,
    pub channels: HashMap<String, u64>,
    pub invalid_provider: u64,
    pub publish_failures: u64,
}

/// Response body for an accepted message.
#[derive(Debug, Serialize)]
pub struct IngressResponse {
    pub channel: Channel,
    pub routing_key: Option<RoutingKey>,
    pub valid: bool,
    pub stream_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

impl ErrorResponse {
    fn new(kind: &str, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            kind: kind.to_string(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// POST /ingress
async fn ingress_handler(
    Extension(state): Extension<Arc<ServerState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    accept(&state, None, &headers, body).await
}

/// POST /ingress/:route
async fn ingress_route_handler(
    Extension(state): Extension<Arc<ServerState>>,
    Path(route): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(route_config) = state.config.routes.get(&route) else {
        debug!(route = %route, "Unknown ingress route");
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new("not_found", format!("Unknown route: {}", route))),
        )
            .into_response();
    };

    accept(&state, Some(route_config), &headers, body).await
}

async fn accept(
    state: &ServerState,
    route: Option<&RouteConfig>,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    let payload = match String::from_utf8(body.to_vec()) {
        Ok(payload) => payload,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(
                    "malformed_payload",
                    format!("Payload is not valid UTF-8: {}", e),
                )),
            )
                .into_response()
        }
    };

    let route_provider = route
        .map(|r| r.provider.clone())
        .or_else(|| state.config.default_provider.clone());

    let ctx = MessageContext::from_headers(&header_values(headers), Utc::now())
        .with_route_provider(route_provider)
        .with_fastline(route.is_some_and(|r| r.fastline));

    let message = match route_message(&payload, &ctx) {
        Ok(message) => message,
        Err(e) => {
            error!(error = %e, "Failed to build envelope");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.kind(), e.to_string())),
            )
                .into_response();
        }
    };

    let decision = &message.decision;
    if decision.channel == Channel::DeadLetter && decision.routing_key.is_none() {
        state.stats.invalid_provider.fetch_add(1, Ordering::Relaxed);
        counter!("ingress_invalid_provider_total").increment(1);
    }

    match state.publisher.publish(&message).await {
        Ok(stream_id) => {
            state
                .stats
                .channel_counter(decision.channel)
                .fetch_add(1, Ordering::Relaxed);
            counter!("ingress_messages_total", "channel" => decision.channel.as_str())
                .increment(1);

            info!(
                channel = %decision.channel,
                routing_key = ?decision.routing_key,
                valid = decision.valid,
                stream_id = %stream_id,
                "Message routed"
            );

            (
                StatusCode::ACCEPTED,
                Json(IngressResponse {
                    channel: decision.channel,
                    routing_key: decision.routing_key.clone(),
                    valid: decision.valid,
                    stream_id,
                }),
            )
                .into_response()
        }
        Err(e) => {
            state.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
            warn!(channel = %decision.channel, error = %e, "Publish failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::new(e.kind(), e.to_string())),
            )
                .into_response()
        }
    }
}

/// Header values that are valid UTF-8; others are ignored.
fn header_values(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

/// GET /status
async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "ingress-router".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /metrics
async fn metrics_handler(Extension(state): Extension<Arc<ServerState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::OK, String::new()),
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let max_payload_bytes = state.config.max_payload_bytes;

    Router::new()
        .route("/ingress", post(ingress_handler))
        .route("/ingress/:route", post(ingress_route_handler))
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(max_payload_bytes))
        .layer(Extension(state))
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server.
pub async fn start_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Starting ingress router HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
