//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use tasklog_core::gate::ops;
use tasklog_core::{
    Authenticator, CacheStore, Clock, Operation, RateLimiter, RequestGate, Scheduler,
    SnapshotCache, SnapshotEngine, TaskStore,
};

use crate::config::Config;

/// Gated operations with configured limit overrides applied.
#[derive(Debug, Clone, Copy)]
pub struct Operations {
    pub list: Operation,
    pub get: Operation,
    pub trigger: Operation,
    pub backfill: Operation,
}

impl Operations {
    pub fn from_config(config: &Config) -> Self {
        Self {
            list: ops::LIST_SNAPSHOTS.with_limit(config.limits.list),
            get: ops::GET_SNAPSHOT.with_limit(config.limits.get),
            trigger: ops::TRIGGER_SNAPSHOT.with_limit(config.limits.trigger),
            backfill: ops::BACKFILL_SNAPSHOT.with_limit(config.limits.backfill),
        }
    }
}

/// State shared across all HTTP handlers.
///
/// Built once in `main`; the rate limiter and the cache live here rather
/// than in globals.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    pub gate: RequestGate,
    pub cache: SnapshotCache,
    pub scheduler: Scheduler,
    pub operations: Operations,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn TaskStore>,
        cache_store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let authenticator = Authenticator::new(config.jwt_secret.as_bytes(), Arc::clone(&clock));
        let limiter = Arc::new(RateLimiter::new(Arc::clone(&clock)));
        let engine = SnapshotEngine::new(Arc::clone(&store));
        let scheduler =
            Scheduler::new(engine, Arc::clone(&clock)).with_fire_at(config.snapshot_at);
        let cache = SnapshotCache::new(store, cache_store, clock)
            .with_ttls(config.list_ttl_secs, config.log_ttl_secs);

        Self {
            operations: Operations::from_config(&config),
            config: Arc::new(config),
            gate: RequestGate::new(authenticator, limiter),
            cache,
            scheduler,
        }
    }
}
