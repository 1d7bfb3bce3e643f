//! Fixed-window rate limiting.
//!
//! Each `(client, operation)` pair owns a counter and a window start. The
//! increment-and-check happens inside one `Mutex` critical section, so two
//! concurrent requests from the same client can never both observe the last
//! free slot. No I/O happens while the lock is held.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::error::Error;

/// Number of tracked windows above which expired ones are swept.
const PRUNE_THRESHOLD: usize = 4096;

/// `max` requests per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u32,
    pub window_secs: u32,
}

impl RateLimit {
    pub const fn per_second(max: u32) -> Self {
        Self { max, window_secs: 1 }
    }

    pub const fn per_minute(max: u32) -> Self {
        Self { max, window_secs: 60 }
    }

    pub const fn per_hour(max: u32) -> Self {
        Self {
            max,
            window_secs: 3600,
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(i64::from(self.window_secs))
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.window_secs {
            1 => write!(f, "{}/second", self.max),
            60 => write!(f, "{}/minute", self.max),
            3600 => write!(f, "{}/hour", self.max),
            secs => write!(f, "{}/{}s", self.max, secs),
        }
    }
}

impl FromStr for RateLimit {
    type Err = Error;

    /// Parses `"<max>/<second|minute|hour|day>"`, e.g. `"60/minute"`.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::Validation(format!("invalid rate limit '{value}'"));
        let (max, unit) = value.trim().split_once('/').ok_or_else(invalid)?;
        let max: u32 = max.trim().parse().map_err(|_| invalid())?;
        let window_secs = match unit.trim().to_ascii_lowercase().as_str() {
            "s" | "sec" | "second" => 1,
            "m" | "min" | "minute" => 60,
            "h" | "hour" => 3600,
            "d" | "day" => 86_400,
            _ => return Err(invalid()),
        };
        Ok(Self { max, window_secs })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    client: String,
    operation: String,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start: DateTime<Utc>,
    count: u32,
    span: Duration,
}

impl Window {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.start + self.span
    }
}

/// Process-wide counter store. Construct once and share through `Arc`.
pub struct RateLimiter {
    windows: Mutex<HashMap<WindowKey, Window>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.windows.lock().map(|w| w.len()).unwrap_or(0);
        write!(f, "RateLimiter({count} windows)")
    }
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Count one request from `client` against `operation`'s `limit`.
    ///
    /// Fails with [`Error::RateLimited`] once the counter for the current
    /// window exceeds `limit.max`.
    pub fn check(&self, client: &str, operation: &str, limit: RateLimit) -> Result<(), Error> {
        let now = self.clock.now();
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| Error::StoreUnavailable("rate limiter state poisoned".to_owned()))?;

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| !w.expired(now));
        }

        let key = WindowKey {
            client: client.to_owned(),
            operation: operation.to_owned(),
        };
        let window = windows.entry(key).or_insert(Window {
            start: now,
            count: 0,
            span: limit.window(),
        });

        if window.expired(now) {
            *window = Window {
                start: now,
                count: 1,
                span: limit.window(),
            };
        } else {
            window.count = window.count.saturating_add(1);
        }

        if window.count > limit.max {
            let remaining = (window.start + window.span - now).num_seconds().max(1);
            return Err(Error::RateLimited {
                operation: operation.to_owned(),
                retry_after_secs: remaining.unsigned_abs(),
            });
        }
        Ok(())
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}
