//! API module for the VAN controller

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

use crate::pipeline::WorkerSnapshot;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Pipeline counters
#[derive(Serialize)]
pub struct PipelineStatus {
    pub intake: WorkerSnapshot,
    pub fulfillment: WorkerSnapshot,
}

/// Readiness check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub backend: String,
    pub pipeline: PipelineStatus,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: true,
        backend: state.store.backend().to_string(),
        pipeline: PipelineStatus {
            intake: state.stats.intake.snapshot(),
            fulfillment: state.stats.fulfillment.snapshot(),
        },
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Site synchronization
        .route("/v1/sync", post(handlers::site_sync))
        // Provisioning reads
        .route("/v1/networks/{id}/van-id", get(handlers::van_id))
        .route("/v1/subjects/{kind}/{id}/secret", get(handlers::subject_secret))
        .route("/v1/backbone/sites/{id}/links", get(handlers::backbone_links))
        // Administration
        .route("/v1/networks", post(handlers::create_network))
        .route("/v1/networks/{id}/invitations", post(handlers::create_invitation))
        .route("/v1/backbones/{id}/sites", post(handlers::add_interior_site))
        .route("/v1/backbone/links", post(handlers::add_link))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
