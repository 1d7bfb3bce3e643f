//! Snapshot history and manual trigger endpoints.

use std::sync::Arc;

use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderName, StatusCode, header};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tasklog_core::model::{Page, PageQuery, SnapshotDetail, SnapshotId};
use tasklog_core::{Admission, Cached};
use tracing::info;
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::error::ServerError;
use crate::middleware::gate::{Guard, gate_middleware};
use crate::state::AppState;

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(OpenApi)]
#[openapi(
    paths(list_snapshots, get_snapshot, trigger_snapshot),
    components(schemas(Page, SnapshotDetail, TriggerResponse))
)]
pub struct SnapshotsApi;

pub fn router(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let ops = state.operations;
    Router::new()
        .route(
            "/tasks",
            get(list_snapshots).route_layer(from_fn_with_state(
                Guard::new(state, ops.list),
                gate_middleware,
            )),
        )
        .route(
            "/tasklogger/{id}",
            get(get_snapshot).route_layer(from_fn_with_state(
                Guard::new(state, ops.get),
                gate_middleware,
            )),
        )
        .route(
            "/log-tasks",
            post(trigger_snapshot).route_layer(from_fn_with_state(
                Guard::new(state, ops.trigger),
                gate_middleware,
            )),
        )
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Only snapshots logged on this day (`YYYY-MM-DD`).
    pub date: Option<String>,
    /// 1-based page number (default 1).
    pub page: Option<u32>,
    /// Rows per page, 1 to 100 (default 10).
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TriggerResponse {
    pub message: String,
}

fn cached_json(cached: Cached) -> Response {
    let cache_status = if cached.hit { "hit" } else { "miss" };
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (X_CACHE, cache_status),
        ],
        cached.body,
    )
        .into_response()
}

#[utoipa::path(
    get,
    path = "/tasks",
    tag = "snapshots",
    params(ListParams),
    responses(
        (status = 200, description = "One page of snapshot history", body = Page),
        (status = 400, description = "Invalid date or paging"),
        (status = 429, description = "Rate limit exceeded"),
        (status = 503, description = "Store unavailable"),
    )
)]
pub async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Response, ServerError> {
    let Query(params) = params.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let query = PageQuery::parse(params.date.as_deref(), params.page, params.per_page)?;
    let cached = state.cache.get_page(&query).await?;
    Ok(cached_json(cached))
}

#[utoipa::path(
    get,
    path = "/tasklogger/{id}",
    tag = "snapshots",
    params(("id" = i64, Path, description = "Snapshot id")),
    responses(
        (status = 200, description = "Snapshot with its task", body = SnapshotDetail),
        (status = 404, description = "Snapshot not found"),
        (status = 429, description = "Rate limit exceeded"),
    )
)]
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    id: Result<Path<SnapshotId>, PathRejection>,
) -> Result<Response, ServerError> {
    let Path(id) = id.map_err(|e| ServerError::BadRequest(e.body_text()))?;
    let cached = state.cache.get_log(id).await?;
    Ok(cached_json(cached))
}

/// Start today's snapshot run in the background.
#[utoipa::path(
    post,
    path = "/log-tasks",
    tag = "snapshots",
    security(("bearer" = [])),
    responses(
        (status = 202, description = "Snapshot run started", body = TriggerResponse),
        (status = 401, description = "Missing, invalid or expired token"),
        (status = 429, description = "Rate limit exceeded"),
    )
)]
pub async fn trigger_snapshot(
    State(state): State<Arc<AppState>>,
    Extension(admission): Extension<Admission>,
) -> (StatusCode, Json<TriggerResponse>) {
    info!(client = %admission.client, "manual snapshot run requested");
    state.scheduler.trigger_detached();
    (
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            message: "Logging of active tasks has been triggered.".to_owned(),
        }),
    )
}
