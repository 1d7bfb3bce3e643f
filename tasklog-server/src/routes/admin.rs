//! Admin-only endpoints, nested under `/admin`.

use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{Extension, Path, State};
use axum::middleware::from_fn_with_state;
use axum::routing::post;
use axum::{Json, Router};
use serde::Serialize;
use tasklog_core::Admission;
use tasklog_core::model::{DATE_FORMAT, parse_date};
use tracing::info;
use utoipa::{OpenApi, ToSchema};

use crate::error::ServerError;
use crate::middleware::gate::{Guard, gate_middleware};
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(paths(backfill_snapshot), components(schemas(BackfillResponse)))]
pub struct AdminApi;

pub fn router(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new().route(
        "/log-tasks/{date}",
        post(backfill_snapshot).route_layer(from_fn_with_state(
            Guard::new(state, state.operations.backfill),
            gate_middleware,
        )),
    )
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackfillResponse {
    /// The day that was snapshotted (`YYYY-MM-DD`).
    pub date: String,
    /// Rows newly written; 0 when the day was already complete.
    pub written: u64,
}

/// Run the snapshot synchronously for a given day.
#[utoipa::path(
    post,
    path = "/admin/log-tasks/{date}",
    tag = "admin",
    security(("bearer" = [])),
    params(("date" = String, Path, description = "Day to snapshot, YYYY-MM-DD")),
    responses(
        (status = 200, description = "Snapshot run finished", body = BackfillResponse),
        (status = 400, description = "Invalid date"),
        (status = 401, description = "Missing, invalid or expired token"),
        (status = 403, description = "Caller is not an admin"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 500, description = "Run aborted part-way"),
    )
)]
pub async fn backfill_snapshot(
    State(state): State<Arc<AppState>>,
    Extension(admission): Extension<Admission>,
    date: Result<Path<String>, PathRejection>,
) -> Result<Json<BackfillResponse>, ServerError> {
    let Path(raw) = date.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let date = parse_date(&raw)?;
    info!(client = %admission.client, %date, "snapshot backfill requested");

    let written = state.scheduler.trigger_for(date).await?;
    Ok(Json(BackfillResponse {
        date: date.format(DATE_FORMAT).to_string(),
        written,
    }))
}
