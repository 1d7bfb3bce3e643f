//! Welcome, ping and health endpoints.

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use std::sync::Arc;
use utoipa::OpenApi;

use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(get_index, get_ping, get_health))]
pub struct HealthApi;

/// Register liveness routes.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_index))
        .route("/ping", get(get_ping))
        .route("/health", get(get_health))
}

#[utoipa::path(
    get,
    path = "/",
    tag = "health",
    responses((status = 200, description = "Welcome message", body = Value))
)]
pub async fn get_index() -> Json<Value> {
    Json(json!({ "message": "Welcome to tasklog!" }))
}

#[utoipa::path(
    get,
    path = "/ping",
    tag = "health",
    responses((status = 200, description = "Service is up", body = Value))
)]
pub async fn get_ping() -> Json<Value> {
    Json(json!({ "message": "pong!" }))
}

/// Heartbeat endpoint.
///
/// Returns `{"status": "ok", "version": "..."}` with HTTP 200.
/// Load-balancers and monitoring systems should poll this endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is healthy", body = Value)
    )
)]
pub async fn get_health() -> Json<Value> {
    Json(json!({
        "status":  "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn health_response_has_ok_status() {
        let Json(body) = get_health().await;
        assert_eq!(body["status"], "ok");
        assert!(!body["version"].as_str().unwrap_or("").is_empty());
    }

    #[tokio::test]
    async fn ping_pongs() {
        let Json(body) = get_ping().await;
        assert_eq!(body["message"], "pong!");
    }
}
