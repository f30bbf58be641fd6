// src/api/http/mod.rs

pub mod health;
pub mod think;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::state::AppState;

pub use health::{health_check, liveness_check, readiness_check};
pub use think::think_handler;

/// Assembles the single-route orchestrator API plus its health probes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/think", post(think_handler))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
