//! HTTP query interface for the latest window aggregate.
//!
//! ```text
//! MQTT feed ──→ buffer ──→ scheduler ──→ latest aggregate ──→ GET /data
//! ```
//!
//! Routes:
//! - `GET /data`: the latest aggregate, or 404 before the first one
//! - `GET /stats`: ingest counters
//! - `GET /health`: liveness and version

use crate::config::HttpConfig;
use crate::core::aggregate::{AggregateResult, LatestAggregate};
use crate::stats::{IngestStatsSnapshot, SharedIngestStats};
use axum::{
    extract::State,
    http::{HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Shared server state
pub struct ServerState {
    latest: LatestAggregate,
    stats: SharedIngestStats,
}

impl ServerState {
    pub fn new(latest: LatestAggregate, stats: SharedIngestStats) -> Self {
        Self { latest, stats }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /data
async fn data(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<AggregateResult>, (StatusCode, Json<ErrorResponse>)> {
    state.latest.get().map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "No data available yet".to_string(),
                code: "NO_DATA".to_string(),
            }),
        )
    })
}

/// GET /stats
async fn stats(State(state): State<Arc<ServerState>>) -> Json<IngestStatsSnapshot> {
    Json(state.stats.snapshot())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(allowed)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the router.
pub fn router(config: &HttpConfig, state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/data", get(data))
        .route("/stats", get(stats))
        .layer(cors_layer(&config.cors_origins))
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: &HttpConfig,
    state: Arc<ServerState>,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(config, state);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Query server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
