use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the audit core.
///
/// Each variant is local to one request or one scheduled run; none of them
/// is fatal to the process.
#[derive(Debug, Error)]
pub enum Error {
    /// No token, a garbled `Authorization` header, or an unparseable token.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The signature is valid but the expiry instant has passed.
    #[error("token expired")]
    Expired,

    /// The token was not signed with the process secret.
    #[error("invalid token signature")]
    InvalidSignature,

    /// The caller's role is not allowed to run the operation.
    #[error("role '{role}' may not call {operation}")]
    Forbidden { role: String, operation: String },

    /// The caller exhausted the fixed window for this operation.
    #[error("rate limit exceeded for {operation}; retry in {retry_after_secs}s")]
    RateLimited {
        operation: String,
        retry_after_secs: u64,
    },

    /// Bad date format or pagination parameters.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The referenced snapshot or task does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A transient storage fault; safe to retry.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A snapshot run aborted part-way; `written` rows stay committed.
    #[error("snapshot run failed after {written} rows: {reason}")]
    SnapshotFailed { written: u64, reason: String },
}

impl Error {
    /// `true` for failures of the gate (authentication, authorization,
    /// rate limiting) rather than of the wrapped operation.
    pub fn is_gate_rejection(&self) -> bool {
        matches!(
            self,
            Error::Unauthenticated(_)
                | Error::Expired
                | Error::InvalidSignature
                | Error::Forbidden { .. }
                | Error::RateLimited { .. }
        )
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
