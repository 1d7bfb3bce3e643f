//! Request admission: authentication, then role authorization, then rate
//! limiting.
//!
//! Operations declare what they need through an [`Operation`] descriptor and
//! the server composes the gate in front of the handler. Nothing downstream
//! of the gate runs unless [`RequestGate::admit`] succeeds.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;

use tracing::debug;

use crate::auth::{Authenticator, bearer};
use crate::error::Error;
use crate::model::{Claims, Role};
use crate::rate_limit::{RateLimit, RateLimiter};

/// Who may call an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Authenticated,
    Roles(&'static [Role]),
}

/// Static description of a gated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    pub name: &'static str,
    pub access: Access,
    pub limit: Option<RateLimit>,
}

impl Operation {
    pub const fn new(name: &'static str, access: Access) -> Self {
        Self {
            name,
            access,
            limit: None,
        }
    }

    pub const fn limited(mut self, limit: RateLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Replace the limit, e.g. with a configured override.
    pub fn with_limit(mut self, limit: Option<RateLimit>) -> Self {
        if limit.is_some() {
            self.limit = limit;
        }
        self
    }
}

pub mod ops {
    use super::{Access, Operation};
    use crate::model::Role;
    use crate::rate_limit::RateLimit;

    const ADMIN_ONLY: &[Role] = &[Role::Admin];

    pub const LOGIN: Operation = Operation::new("login", Access::Public).limited(RateLimit::per_minute(5));

    pub const LIST_SNAPSHOTS: Operation =
        Operation::new("list_snapshots", Access::Public).limited(RateLimit::per_minute(60));

    pub const GET_SNAPSHOT: Operation =
        Operation::new("get_snapshot", Access::Public).limited(RateLimit::per_minute(20));

    pub const IMPORT_TASKS: Operation =
        Operation::new("import_tasks", Access::Authenticated).limited(RateLimit::per_hour(10));

    pub const TRIGGER_SNAPSHOT: Operation =
        Operation::new("trigger_snapshot", Access::Authenticated).limited(RateLimit::per_minute(10));

    pub const BACKFILL_SNAPSHOT: Operation =
        Operation::new("backfill_snapshot", Access::Roles(ADMIN_ONLY)).limited(RateLimit::per_hour(10));
}

/// The parts of an inbound request the gate looks at.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub authorization: Option<&'a str>,
    pub client_ip: Option<IpAddr>,
}

/// Proof that a request passed the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub claims: Option<Claims>,
    /// Key used for rate limiting: `user:<sub>` or `ip:<addr>`.
    pub client: String,
}

#[derive(Debug, Clone)]
pub struct RequestGate {
    authenticator: Authenticator,
    limiter: Arc<RateLimiter>,
}

impl RequestGate {
    pub fn new(authenticator: Authenticator, limiter: Arc<RateLimiter>) -> Self {
        Self {
            authenticator,
            limiter,
        }
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn admit(&self, request: GateRequest<'_>, op: &Operation) -> Result<Admission, Error> {
        let claims = match op.access {
            Access::Public => None,
            Access::Authenticated | Access::Roles(_) => {
                let token = bearer(request.authorization)?;
                Some(self.authenticator.verify(token)?)
            }
        };

        if let (Access::Roles(allowed), Some(claims)) = (op.access, claims.as_ref()) {
            if !allowed.contains(&claims.role) {
                return Err(Error::Forbidden {
                    role: claims.role.to_string(),
                    operation: op.name.to_owned(),
                });
            }
        }

        let client = match (&claims, request.client_ip) {
            (Some(claims), _) => format!("user:{}", claims.subject),
            (None, Some(ip)) => format!("ip:{ip}"),
            (None, None) => "ip:unknown".to_owned(),
        };

        if let Some(limit) = op.limit {
            self.limiter.check(&client, op.name, limit)?;
        }

        debug!(operation = op.name, client = %client, "request admitted");
        Ok(Admission { claims, client })
    }

    /// Admit `request`, then run `f`. `f` is never called when admission
    /// fails.
    pub async fn run<F, Fut, T>(&self, request: GateRequest<'_>, op: &Operation, f: F) -> Result<T, Error>
    where
        F: FnOnce(Admission) -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let admission = self.admit(request, op)?;
        f(admission).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        clock: Arc<ManualClock>,
        gate: RequestGate,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 4, 7, 8, 0, 0).unwrap(),
        ));
        let auth = Authenticator::new(b"gate-secret", clock.clone());
        let limiter = Arc::new(RateLimiter::new(clock.clone()));
        Fixture {
            clock,
            gate: RequestGate::new(auth, limiter),
        }
    }

    fn token(gate: &RequestGate, role: Role, ttl: Duration) -> String {
        format!(
            "Bearer {}",
            gate.authenticator()
                .issue("42", "someone", role, ttl)
                .unwrap()
        )
    }

    fn request(authorization: Option<&str>) -> GateRequest<'_> {
        GateRequest {
            authorization,
            client_ip: Some("192.0.2.10".parse().unwrap()),
        }
    }

    #[test]
    fn expired_token_is_rejected() {
        let f = fixture();
        let header = token(&f.gate, Role::Admin, Duration::seconds(10));
        f.clock.advance(Duration::seconds(11));
        let err = f
            .gate
            .admit(request(Some(&header)), &ops::TRIGGER_SNAPSHOT)
            .unwrap_err();
        assert!(matches!(err, Error::Expired));
    }

    #[test]
    fn user_role_is_forbidden_on_admin_operation() {
        let f = fixture();
        let header = token(&f.gate, Role::User, Duration::hours(1));
        let err = f
            .gate
            .admit(request(Some(&header)), &ops::BACKFILL_SNAPSHOT)
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[test]
    fn admin_is_admitted_and_keyed_by_subject() {
        let f = fixture();
        let header = token(&f.gate, Role::Admin, Duration::hours(1));
        let admission = f
            .gate
            .admit(request(Some(&header)), &ops::BACKFILL_SNAPSHOT)
            .unwrap();
        assert_eq!(admission.client, "user:42");
        assert_eq!(admission.claims.unwrap().role, Role::Admin);
    }

    #[test]
    fn missing_token_on_authenticated_operation() {
        let f = fixture();
        let err = f.gate.admit(request(None), &ops::TRIGGER_SNAPSHOT).unwrap_err();
        assert!(matches!(err, Error::Unauthenticated(_)));
    }

    #[test]
    fn documented_limits() {
        let limits: Vec<(&str, String)> = [
            ops::LOGIN,
            ops::LIST_SNAPSHOTS,
            ops::IMPORT_TASKS,
            ops::GET_SNAPSHOT,
            ops::TRIGGER_SNAPSHOT,
            ops::BACKFILL_SNAPSHOT,
        ]
        .iter()
        .map(|op| (op.name, op.limit.map(|l| l.to_string()).unwrap_or_default()))
        .collect();
        assert_eq!(
            limits,
            vec![
                ("login", "5/minute".to_owned()),
                ("list_snapshots", "60/minute".to_owned()),
                ("import_tasks", "10/hour".to_owned()),
                ("get_snapshot", "20/minute".to_owned()),
                ("trigger_snapshot", "10/minute".to_owned()),
                ("backfill_snapshot", "10/hour".to_owned()),
            ]
        );
        assert_eq!(ops::LOGIN.access, Access::Public);
        assert_eq!(ops::IMPORT_TASKS.access, Access::Authenticated);
    }

    #[test]
    fn login_is_limited_before_any_credentials_exist() {
        let f = fixture();
        for _ in 0..5 {
            assert!(f.gate.admit(request(None), &ops::LOGIN).is_ok());
        }
        assert!(matches!(
            f.gate.admit(request(None), &ops::LOGIN),
            Err(Error::RateLimited { .. })
        ));
    }

    #[test]
    fn public_operation_is_limited_per_ip() {
        let f = fixture();
        for _ in 0..20 {
            let admission = f.gate.admit(request(None), &ops::GET_SNAPSHOT).unwrap();
            assert_eq!(admission.client, "ip:192.0.2.10");
            assert!(admission.claims.is_none());
        }
        let err = f.gate.admit(request(None), &ops::GET_SNAPSHOT).unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));

        let other = GateRequest {
            authorization: None,
            client_ip: Some("192.0.2.11".parse().unwrap()),
        };
        assert!(f.gate.admit(other, &ops::GET_SNAPSHOT).is_ok());
    }

    #[tokio::test]
    async fn wrapped_operation_does_not_run_on_rejection() {
        let f = fixture();
        let calls = &AtomicUsize::new(0);
        let header = token(&f.gate, Role::User, Duration::hours(1));

        let result = f
            .gate
            .run(request(Some(&header)), &ops::BACKFILL_SNAPSHOT, |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Forbidden { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let result = f
            .gate
            .run(request(Some(&header)), &ops::TRIGGER_SNAPSHOT, |admission| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(admission.client)
            })
            .await;
        assert_eq!(result.unwrap(), "user:42");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
