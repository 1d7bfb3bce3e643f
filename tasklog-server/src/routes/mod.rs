//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Liveness routes
//! - Snapshot history and trigger routes, each behind its own gate
//! - admin `/admin` routes (admin role only)
//! - the OpenAPI document at `/api-docs/openapi.json`

mod admin;
pub mod doc;
mod health;
mod snapshots;

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router, middleware};
use tower::ServiceBuilder;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(snapshots::router(&state))
        .nest("/admin", admin::router(&state))
        .route("/api-docs/openapi.json", get(openapi_json))
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(&state)))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(doc::get_docs())
}

// ── Tests ──────────────────────────────────────────────────────────────────────
