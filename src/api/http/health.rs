// src/api/http/health.rs
// Health and readiness probes. Readiness reports per-MCP-server status
// rather than a database/vector-store check, since the orchestrator's only
// managed dependencies are the configured MCP child processes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::api::state::AppState;

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    servers: Vec<ServerStatus>,
}

#[derive(Serialize)]
struct ServerStatus {
    name: String,
    healthy: bool,
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "healthy"})))
}

/// GET /ready - 200 only once every configured server is healthy.
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.manager.health_monitor().all_health().await;
    let mut servers = Vec::with_capacity(health.len());
    for h in health {
        let healthy = state.manager.is_server_healthy(&h.name).await;
        servers.push(ServerStatus { name: h.name, healthy });
    }
    let all_healthy = servers.iter().all(|s| s.healthy);

    let response = ReadyResponse {
        status: if all_healthy { "ready" } else { "not_ready" },
        servers,
    };

    if all_healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /live
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "alive"})))
}
