//! Bearer-token verification.
//!
//! Tokens are HS256 JWTs signed with a process-wide secret. The signature is
//! checked by `jsonwebtoken`; the expiry is checked here against the injected
//! [`Clock`] with no leeway.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::clock::Clock;
use crate::error::Error;
use crate::model::{Claims, Role};

const BEARER_PREFIX: &str = "Bearer ";

/// Pull the token out of an `Authorization` header value.
pub fn bearer(header: Option<&str>) -> Result<&str, Error> {
    let header = header
        .ok_or_else(|| Error::Unauthenticated("missing Authorization header".to_owned()))?;
    match header.strip_prefix(BEARER_PREFIX).map(str::trim) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(Error::Unauthenticated(
            "invalid Authorization format; expected 'Bearer <token>'".to_owned(),
        )),
    }
}

#[derive(Clone)]
pub struct Authenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator").finish_non_exhaustive()
    }
}

impl Authenticator {
    pub fn new(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is compared against `clock` in `verify`.
        validation.validate_exp = false;
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            clock,
        }
    }

    /// Decode and verify `token`.
    pub fn verify(&self, token: &str) -> Result<Claims, Error> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => Error::InvalidSignature,
                ErrorKind::ExpiredSignature => Error::Expired,
                _ => Error::Unauthenticated(format!("invalid token: {e}")),
            })?;

        if data.claims.expiry < self.clock.now().timestamp() {
            return Err(Error::Expired);
        }
        Ok(data.claims)
    }

    /// Mint a token valid for `ttl` from the clock's current instant.
    pub fn issue(
        &self,
        subject: impl Into<String>,
        username: impl Into<String>,
        role: Role,
        ttl: Duration,
    ) -> Result<String, Error> {
        let claims = Claims {
            subject: subject.into(),
            username: username.into(),
            role,
            expiry: (self.clock.now() + ttl).timestamp(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Unauthenticated(format!("failed to sign token: {e}")))
    }
}
