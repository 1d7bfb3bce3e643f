//! Server configuration, loaded from environment variables at startup.

use chrono::NaiveTime;
use tasklog_core::RateLimit;

/// Runtime configuration for tasklog-server.
///
/// Every field has a default so the server starts without any environment
/// variables set; only `TASKLOG_JWT_SECRET` should always be overridden.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://tasklog.db"`).
    pub database_url: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// HMAC secret used to verify bearer tokens.
    pub jwt_secret: String,

    /// Upper bound for a single store call.
    pub store_timeout_ms: u64,

    pub list_ttl_secs: u64,
    pub log_ttl_secs: u64,

    /// Redis URL for the shared cache; the in-process cache is used when unset.
    pub redis_url: Option<String>,

    /// UTC wall-clock time of the daily snapshot run.
    pub snapshot_at: NaiveTime,

    /// Comma-separated list of allowed CORS origins; wildcard when unset.
    pub cors_allowed_origins: Option<String>,

    /// Take the client address from `X-Forwarded-For` when behind a proxy.
    pub trust_forwarded_for: bool,

    pub limits: LimitOverrides,
}

/// Per-operation rate-limit overrides, e.g. `TASKLOG_LIMIT_LIST=120/minute`.
#[derive(Debug, Clone, Default)]
pub struct LimitOverrides {
    pub list: Option<RateLimit>,
    pub get: Option<RateLimit>,
    pub trigger: Option<RateLimit>,
    pub backfill: Option<RateLimit>,
}

pub const DEFAULT_JWT_SECRET: &str = "change-me";

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
        let limit = |key: &str| lookup(key).and_then(|v| v.parse::<RateLimit>().ok());

        Self {
            bind_address: env_or("TASKLOG_BIND", "0.0.0.0:3000"),
            database_url: env_or("TASKLOG_DATABASE_URL", "sqlite://tasklog.db"),
            log_level: env_or("TASKLOG_LOG", "info"),
            log_json: lookup("TASKLOG_LOG_JSON").is_some_and(|v| is_truthy(&v)),
            jwt_secret: env_or("TASKLOG_JWT_SECRET", DEFAULT_JWT_SECRET),
            store_timeout_ms: parse_or(lookup("TASKLOG_STORE_TIMEOUT_MS"), 5_000),
            list_ttl_secs: parse_or(lookup("TASKLOG_LIST_TTL_SECS"), 60),
            log_ttl_secs: parse_or(lookup("TASKLOG_LOG_TTL_SECS"), 3_600),
            redis_url: lookup("TASKLOG_REDIS_URL").filter(|v| !v.trim().is_empty()),
            snapshot_at: lookup("TASKLOG_SNAPSHOT_AT")
                .and_then(|v| NaiveTime::parse_from_str(v.trim(), "%H:%M").ok())
                .unwrap_or(NaiveTime::MIN),
            cors_allowed_origins: lookup("TASKLOG_CORS_ORIGINS"),
            trust_forwarded_for: lookup("TASKLOG_TRUST_FORWARDED_FOR").is_some_and(|v| is_truthy(&v)),
            limits: LimitOverrides {
                list: limit("TASKLOG_LIMIT_LIST"),
                get: limit("TASKLOG_LIMIT_GET"),
                trigger: limit("TASKLOG_LIMIT_TRIGGER"),
                backfill: limit("TASKLOG_LIMIT_BACKFILL"),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_without_environment() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_address, "0.0.0.0:3000");
        assert_eq!((cfg.list_ttl_secs, cfg.log_ttl_secs), (60, 3600));
        assert_eq!(cfg.snapshot_at, NaiveTime::MIN);
        assert!(cfg.redis_url.is_none());
        assert!(cfg.limits.list.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let vars: HashMap<&str, &str> = [
            ("TASKLOG_LOG_JSON", "TRUE"),
            ("TASKLOG_SNAPSHOT_AT", "02:30"),
            ("TASKLOG_LIST_TTL_SECS", "15"),
            ("TASKLOG_LIMIT_LIST", "120/minute"),
            ("TASKLOG_LIMIT_GET", "garbage"),
        ]
        .into_iter()
        .collect();
        let cfg = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string()));

        assert!(cfg.log_json);
        assert_eq!(cfg.snapshot_at, NaiveTime::from_hms_opt(2, 30, 0).unwrap());
        assert_eq!(cfg.list_ttl_secs, 15);
        assert_eq!(cfg.limits.list, Some(RateLimit::per_minute(120)));
        assert_eq!(cfg.limits.get, None);
    }
}
