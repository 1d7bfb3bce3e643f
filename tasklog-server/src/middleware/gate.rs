//! Per-route admission through the core [`RequestGate`].
//!
//! Attach with `route_layer(from_fn_with_state(Guard::new(&state, op),
//! gate_middleware))`. On success the [`Admission`] is inserted into the
//! request extensions for the handler; on failure the handler never runs.
//!
//! [`RequestGate`]: tasklog_core::RequestGate

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tasklog_core::{Admission, GateRequest, Operation};
use tracing::info;

use crate::error::ServerError;
use crate::state::AppState;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, Clone)]
pub struct Guard {
    state: Arc<AppState>,
    operation: Operation,
}

impl Guard {
    pub fn new(state: &Arc<AppState>, operation: Operation) -> Self {
        Self {
            state: Arc::clone(state),
            operation,
        }
    }
}

pub async fn gate_middleware(State(guard): State<Guard>, mut req: Request<Body>, next: Next) -> Response {
    let client_ip = client_ip(&req, guard.state.config.trust_forwarded_for);
    let result = guard.state.gate.admit(
        GateRequest {
            authorization: req
                .headers()
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
            client_ip,
        },
        &guard.operation,
    );

    match result {
        Ok(admission) => {
            req.extensions_mut().insert::<Admission>(admission);
            next.run(req).await
        }
        Err(e) => {
            info!(operation = guard.operation.name, error = %e, "request rejected");
            ServerError::from(e).into_response()
        }
    }
}

fn client_ip(req: &Request<Body>, trust_forwarded_for: bool) -> Option<IpAddr> {
    if trust_forwarded_for {
        if let Some(ip) = forwarded_for(req.headers()) {
            return Some(ip);
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// First address in `X-Forwarded-For`.
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(X_FORWARDED_FOR)?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, "203.0.113.5, 10.0.0.1".parse().unwrap());
        assert_eq!(forwarded_for(&headers), Some("203.0.113.5".parse().unwrap()));

        headers.insert(X_FORWARDED_FOR, "not-an-ip".parse().unwrap());
        assert_eq!(forwarded_for(&headers), None);
    }
}
