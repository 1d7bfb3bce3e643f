//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON `{"error": …}`
//! body with the matching status code.
//!
//! Store faults and failed snapshot runs are logged in full, but callers only
//! see a generic message.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tasklog_core::Error as CoreError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ServerError {
    /// Propagated from the audit core.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The caller sent a request axum could not decode.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An unclassified internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Core(e) => match e {
                CoreError::Unauthenticated(_) | CoreError::Expired | CoreError::InvalidSignature => {
                    StatusCode::UNAUTHORIZED
                }
                CoreError::Forbidden { .. } => StatusCode::FORBIDDEN,
                CoreError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::SnapshotFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut retry_after = None;

        let client_message = match &self {
            ServerError::Core(CoreError::StoreUnavailable(m)) => {
                error!(error = %m, "store unavailable");
                "service temporarily unavailable".to_owned()
            }
            ServerError::Core(CoreError::SnapshotFailed { written, reason }) => {
                error!(written, reason = %reason, "snapshot run failed");
                "snapshot run failed".to_owned()
            }
            ServerError::Core(CoreError::RateLimited {
                operation,
                retry_after_secs,
            }) => {
                warn!(operation = %operation, retry_after_secs, "rate limited");
                retry_after = Some(*retry_after_secs);
                self.to_string()
            }
            ServerError::Core(e) => e.to_string(),
            ServerError::BadRequest(m) => m.clone(),
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                "internal server error".to_owned()
            }
        };

        let mut response = (status, Json(json!({ "error": client_message }))).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(e: anyhow::Error) -> Self {
        error!(error = ?e, "converting anyhow error to ServerError::Internal");
        ServerError::Internal(e.to_string())
    }
}
