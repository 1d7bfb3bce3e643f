use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CacheStore;
use crate::clock::Clock;
use crate::error::Error;
use crate::model::{DATE_FORMAT, Page, PageQuery, SnapshotId};
use crate::store::TaskStore;

pub const DEFAULT_LIST_TTL_SECS: u64 = 60;
pub const DEFAULT_LOG_TTL_SECS: u64 = 3600;

/// Key segment used when a listing has no date filter.
const ALL_DATES: &str = "all";

/// A serialized response body and whether it came from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cached {
    pub body: Bytes,
    pub hit: bool,
}

#[derive(Serialize, Deserialize)]
struct Entry {
    inserted_at: DateTime<Utc>,
    body: String,
}

/// Read-through cache over snapshot history.
///
/// Entries are never invalidated on write; a listing can lag the store by
/// at most its TTL.
#[derive(Clone)]
pub struct SnapshotCache {
    store: Arc<dyn TaskStore>,
    cache: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    list_ttl_secs: u64,
    log_ttl_secs: u64,
}

impl std::fmt::Debug for SnapshotCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotCache")
            .field("list_ttl_secs", &self.list_ttl_secs)
            .field("log_ttl_secs", &self.log_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn TaskStore>, cache: Arc<dyn CacheStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache,
            clock,
            list_ttl_secs: DEFAULT_LIST_TTL_SECS,
            log_ttl_secs: DEFAULT_LOG_TTL_SECS,
        }
    }

    pub fn with_ttls(mut self, list_ttl_secs: u64, log_ttl_secs: u64) -> Self {
        self.list_ttl_secs = list_ttl_secs;
        self.log_ttl_secs = log_ttl_secs;
        self
    }

    /// `tasklogs:{date|all}:{page}:{per_page}`
    pub fn page_key(query: &PageQuery) -> String {
        let date = query
            .date()
            .map(|d| d.format(DATE_FORMAT).to_string())
            .unwrap_or_else(|| ALL_DATES.to_owned());
        format!("tasklogs:{date}:{}:{}", query.page(), query.per_page())
    }

    /// `tasklog:{id}`
    pub fn log_key(id: SnapshotId) -> String {
        format!("tasklog:{id}")
    }

    /// One page of snapshot history as a serialized [`Page`].
    pub async fn get_page(&self, query: &PageQuery) -> Result<Cached, Error> {
        let key = Self::page_key(query);
        if let Some(body) = self.lookup(&key, self.list_ttl_secs).await {
            return Ok(Cached { body, hit: true });
        }

        let (rows, total) = self.store.query_page(query).await?;
        let body = encode(&Page::new(rows, total, query))?;
        self.fill(&key, &body, self.list_ttl_secs).await;
        Ok(Cached {
            body: Bytes::from(body),
            hit: false,
        })
    }

    /// A single snapshot joined with its task. Missing ids are not cached.
    pub async fn get_log(&self, id: SnapshotId) -> Result<Cached, Error> {
        let key = Self::log_key(id);
        if let Some(body) = self.lookup(&key, self.log_ttl_secs).await {
            return Ok(Cached { body, hit: true });
        }

        let detail = self
            .store
            .get_snapshot(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("task log {id}")))?;
        let body = encode(&detail)?;
        self.fill(&key, &body, self.log_ttl_secs).await;
        Ok(Cached {
            body: Bytes::from(body),
            hit: false,
        })
    }

    /// A fresh cached body for `key`, or `None` on miss, expiry, a corrupt
    /// entry or a cache failure.
    async fn lookup(&self, key: &str, ttl_secs: u64) -> Option<Bytes> {
        let raw = match self.cache.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, falling back to store");
                return None;
            }
        };
        let entry: Entry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "discarding corrupt cache entry");
                return None;
            }
        };

        let age = self.clock.now() - entry.inserted_at;
        let ttl_ms = i64::try_from(ttl_secs).unwrap_or(i64::MAX).saturating_mul(1000);
        if age.num_milliseconds() >= ttl_ms {
            debug!(key, age_ms = age.num_milliseconds(), "cache entry stale");
            return None;
        }
        debug!(key, "cache hit");
        Some(Bytes::from(entry.body))
    }

    async fn fill(&self, key: &str, body: &str, ttl_secs: u64) {
        let entry = Entry {
            inserted_at: self.clock.now(),
            body: body.to_owned(),
        };
        let raw = match serde_json::to_vec(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "failed to encode cache entry");
                return;
            }
        };
        if let Err(e) = self.cache.set_with_ttl(key, raw, ttl_secs).await {
            warn!(key, error = %e, "cache write failed");
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, Error> {
    serde_json::to_string(value)
        .map_err(|e| Error::StoreUnavailable(format!("failed to serialize response: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::clock::ManualClock;
    use crate::model::{NewTask, SnapshotRow};
    use crate::snapshot::SnapshotEngine;
    use crate::store::MemoryStore;
    use chrono::{Duration, NaiveDate, TimeZone};

    struct Fixture {
        store: Arc<MemoryStore>,
        cache_store: Arc<MemoryCacheStore>,
        clock: Arc<ManualClock>,
        cache: SnapshotCache,
        engine: SnapshotEngine,
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 4, 7, 12, 0, 0).unwrap(),
        ));
        let cache_store = Arc::new(MemoryCacheStore::new(clock.clone()));
        let cache = SnapshotCache::new(store.clone(), cache_store.clone(), clock.clone());
        let engine = SnapshotEngine::new(store.clone());
        Fixture {
            store,
            cache_store,
            clock,
            cache,
            engine,
        }
    }

    fn page(body: &Bytes) -> Page {
        serde_json::from_slice(body).unwrap()
    }

    #[test]
    fn keys_capture_query_shape() {
        let all = PageQuery::new(None, 1, 10).unwrap();
        assert_eq!(SnapshotCache::page_key(&all), "tasklogs:all:1:10");

        let dated = PageQuery::new(Some(day(7)), 2, 25).unwrap();
        assert_eq!(SnapshotCache::page_key(&dated), "tasklogs:2025-04-07:2:25");

        assert_eq!(SnapshotCache::log_key(9), "tasklog:9");
    }

    #[tokio::test]
    async fn fresh_entry_is_served_until_ttl() {
        let f = fixture();
        f.store.insert_task(NewTask::active("a", day(1))).await.unwrap();
        f.engine.run_snapshot(day(5)).await.unwrap();
        let query = PageQuery::new(None, 1, 10).unwrap();

        let first = f.cache.get_page(&query).await.unwrap();
        assert!(!first.hit);
        assert_eq!(page(&first.body).total, 1);

        f.engine.run_snapshot(day(6)).await.unwrap();
        f.clock.advance(Duration::seconds(59));
        let second = f.cache.get_page(&query).await.unwrap();
        assert!(second.hit);
        assert_eq!(second.body, first.body);

        f.clock.advance(Duration::seconds(1));
        let third = f.cache.get_page(&query).await.unwrap();
        assert!(!third.hit);
        assert_eq!(page(&third.body).total, 2);
    }

    #[tokio::test]
    async fn oversized_ttl_never_goes_stale() {
        let f = fixture();
        let cache = f.cache.clone().with_ttls(u64::MAX, u64::MAX);
        f.store.insert_task(NewTask::active("a", day(1))).await.unwrap();
        f.engine.run_snapshot(day(5)).await.unwrap();
        let query = PageQuery::new(None, 1, 10).unwrap();

        assert!(!cache.get_page(&query).await.unwrap().hit);
        f.clock.advance(Duration::days(365));
        assert!(cache.get_page(&query).await.unwrap().hit);
    }

    #[tokio::test]
    async fn pages_are_disjoint_and_ordered() {
        let f = fixture();
        let mut ids = Vec::new();
        for i in 0..9 {
            let task = f
                .store
                .insert_task(NewTask::active(format!("task-{i}"), day(1)))
                .await
                .unwrap();
            ids.push(task.id);
        }
        f.engine.run_snapshot(day(5)).await.unwrap();
        f.store.set_task_active(ids[0], false).await.unwrap();
        f.engine.run_snapshot(day(6)).await.unwrap();
        f.engine.run_snapshot(day(7)).await.unwrap();

        let everything = f
            .cache
            .get_page(&PageQuery::new(None, 1, 100).unwrap())
            .await
            .unwrap();
        let everything = page(&everything.body);
        assert_eq!(everything.total, 25);
        for pair in everything.tasks.windows(2) {
            let (a, b): (&SnapshotRow, &SnapshotRow) = (&pair[0], &pair[1]);
            assert!(a.date_logged > b.date_logged || (a.date_logged == b.date_logged && a.id < b.id));
        }

        let first = page(
            &f.cache
                .get_page(&PageQuery::new(None, 1, 10).unwrap())
                .await
                .unwrap()
                .body,
        );
        let second = page(
            &f.cache
                .get_page(&PageQuery::new(None, 2, 10).unwrap())
                .await
                .unwrap()
                .body,
        );
        assert_eq!((first.pages, first.current_page), (3, 1));
        assert_eq!(second.current_page, 2);

        let combined: Vec<SnapshotRow> = first.tasks.into_iter().chain(second.tasks).collect();
        assert_eq!(combined.as_slice(), &everything.tasks[..20]);
    }

    #[tokio::test]
    async fn date_filter_narrows_listing() {
        let f = fixture();
        f.store.insert_task(NewTask::active("a", day(1))).await.unwrap();
        f.engine.run_snapshot(day(5)).await.unwrap();
        f.engine.run_snapshot(day(6)).await.unwrap();

        let got = f
            .cache
            .get_page(&PageQuery::new(Some(day(6)), 1, 10).unwrap())
            .await
            .unwrap();
        let got = page(&got.body);
        assert_eq!(got.total, 1);
        assert_eq!(got.tasks[0].date_logged, day(6));
    }

    #[tokio::test]
    async fn failing_cache_falls_back_to_store() {
        let f = fixture();
        f.store.insert_task(NewTask::active("a", day(1))).await.unwrap();
        f.engine.run_snapshot(day(5)).await.unwrap();
        f.cache_store.set_failing(true);

        let got = f
            .cache
            .get_page(&PageQuery::new(None, 1, 10).unwrap())
            .await
            .unwrap();
        assert!(!got.hit);
        assert_eq!(page(&got.body).total, 1);
    }

    #[tokio::test]
    async fn single_lookup_is_cached_but_missing_ids_are_not() {
        let f = fixture();
        f.store
            .insert_task(NewTask::active("a", day(1)).with_description("desc"))
            .await
            .unwrap();
        f.engine.run_snapshot(day(5)).await.unwrap();
        let id = f.store.snapshots_on(day(5)).await.unwrap()[0].id;

        assert!(matches!(f.cache.get_log(id + 100).await, Err(Error::NotFound(_))));
        assert!(f.cache_store.is_empty().await);

        let miss = f.cache.get_log(id).await.unwrap();
        assert!(!miss.hit);
        let detail: crate::model::SnapshotDetail = serde_json::from_slice(&miss.body).unwrap();
        assert_eq!(detail.task.description.as_deref(), Some("desc"));

        f.clock.advance(Duration::seconds(3599));
        assert!(f.cache.get_log(id).await.unwrap().hit);
        f.clock.advance(Duration::seconds(1));
        assert!(!f.cache.get_log(id).await.unwrap().hit);
    }

    #[tokio::test]
    async fn store_outage_on_miss_is_reported() {
        let f = fixture();
        f.store.set_unavailable(true).await;
        assert!(matches!(
            f.cache.get_page(&PageQuery::new(None, 1, 10).unwrap()).await,
            Err(Error::StoreUnavailable(_))
        ));
    }
}
