//! Key/value cache stores and the snapshot read-through cache.
//!
//! [`CacheStore`] is a minimal byte-oriented protocol. Values carry a
//! backend TTL for eviction only; freshness is decided by
//! [`SnapshotCache`] from the insertion instant stored inside each entry.

mod snapshot_cache;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration as StdDuration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use moka::Expiry;
use moka::future::Cache;
use thiserror::Error;

use crate::clock::Clock;

pub use snapshot_cache::{Cached, SnapshotCache};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    #[error("cache backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError>;
}

// ── In-process ───────────────────────────────────────────────────────────────

/// Entry bound of [`MemoryCacheStore::new`].
pub const DEFAULT_MAX_ENTRIES: u64 = 10_000;

/// Longest backend TTL handed to the eviction policy.
const MAX_EVICTION_TTL: StdDuration = StdDuration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone)]
struct Slot {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
    ttl: StdDuration,
}

/// Evicts each slot after its own TTL.
struct SlotExpiry;

impl Expiry<String, Slot> for SlotExpiry {
    fn expire_after_create(&self, _key: &String, slot: &Slot, _created_at: Instant) -> Option<StdDuration> {
        Some(slot.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        slot: &Slot,
        _updated_at: Instant,
        _duration_until_expiry: Option<StdDuration>,
    ) -> Option<StdDuration> {
        Some(slot.ttl)
    }
}

/// Process-local cache store backed by a bounded [`moka`] cache.
///
/// Slots are evicted by capacity and by their TTL in wall time. Reads also
/// drop slots the injected [`Clock`] considers expired.
pub struct MemoryCacheStore {
    slots: Cache<String, Slot>,
    clock: Arc<dyn Clock>,
    failing: AtomicBool,
}

impl std::fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("entries", &self.slots.entry_count())
            .finish_non_exhaustive()
    }
}

impl MemoryCacheStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity(clock: Arc<dyn Clock>, max_entries: u64) -> Self {
        let slots = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(SlotExpiry)
            .build();
        Self {
            slots,
            clock,
            failing: AtomicBool::new(false),
        }
    }

    /// Make every call fail with [`CacheError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Live slot count after pending evictions have run.
    pub async fn len(&self) -> u64 {
        self.slots.run_pending_tasks().await;
        self.slots.entry_count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache offline".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.check()?;
        match self.slots.get(key).await {
            None => Ok(None),
            Some(slot) if slot.expires_at > self.clock.now() => Ok(Some(slot.value)),
            Some(_) => {
                self.slots.invalidate(key).await;
                Ok(None)
            }
        }
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError> {
        self.check()?;
        let expires_at = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| self.clock.now().checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let slot = Slot {
            value,
            expires_at,
            ttl: StdDuration::from_secs(ttl_secs).min(MAX_EVICTION_TTL),
        };
        self.slots.insert(key.to_owned(), slot).await;
        Ok(())
    }
}

// ── Redis ────────────────────────────────────────────────────────────────────

#[cfg(feature = "redis")]
pub use self::redis_store::RedisCacheStore;

#[cfg(feature = "redis")]
mod redis_store {
    use std::future::Future;
    use std::time::Duration;

    use async_trait::async_trait;
    use deadpool_redis::{Config, Pool, Runtime};
    use redis::AsyncCommands;

    use super::{CacheError, CacheStore};

    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

    /// Cache store backed by a pooled Redis connection.
    #[derive(Clone)]
    pub struct RedisCacheStore {
        pool: Pool,
        timeout: Duration,
    }

    impl RedisCacheStore {
        pub fn new(pool: Pool) -> Self {
            Self {
                pool,
                timeout: DEFAULT_TIMEOUT,
            }
        }

        pub fn from_url(url: &str) -> Result<Self, CacheError> {
            let pool = Config::from_url(url)
                .create_pool(Some(Runtime::Tokio1))
                .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            Ok(Self::new(pool))
        }

        pub fn with_timeout(mut self, timeout: Duration) -> Self {
            self.timeout = timeout;
            self
        }

        /// Run `call` (pool checkout included) within the configured timeout.
        async fn bounded<T, F>(&self, call: F) -> Result<T, CacheError>
        where
            F: Future<Output = Result<T, CacheError>> + Send,
        {
            match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Unavailable(format!(
                    "redis call timed out after {:?}",
                    self.timeout
                ))),
            }
        }
    }

    #[async_trait]
    impl CacheStore for RedisCacheStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.bounded(async {
                let mut conn = self
                    .pool
                    .get()
                    .await
                    .map_err(|e| CacheError::Unavailable(e.to_string()))?;
                conn.get::<_, Option<Vec<u8>>>(key)
                    .await
                    .map_err(|e| CacheError::Backend(e.to_string()))
            })
            .await
        }

        async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError> {
            self.bounded(async {
                let mut conn = self
                    .pool
                    .get()
                    .await
                    .map_err(|e| CacheError::Unavailable(e.to_string()))?;
                conn.set_ex::<_, _, ()>(key, value, ttl_secs.max(1))
                    .await
                    .map_err(|e| CacheError::Backend(e.to_string()))
            })
            .await
        }
    }

    #[cfg(test)]
    mod test {
        use super::*;

        #[tokio::test]
        async fn unreachable_server_times_out_as_unavailable() {
            // 192.0.2.0/24 is reserved for documentation and never routes.
            let store = RedisCacheStore::from_url("redis://192.0.2.1:6379")
                .unwrap()
                .with_timeout(Duration::from_millis(50));
            assert!(matches!(store.get("k").await, Err(CacheError::Unavailable(_))));
        }
    }
}
