//! tasklog-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Build the cache store, the gate and the snapshot scheduler.
//! 5. Start the daily snapshot loop in a background task.
//! 6. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod error;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tasklog_core::{CacheStore, Clock, MemoryCacheStore, SqliteStore, SystemClock};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{Config, DEFAULT_JWT_SECRET};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: TASKLOG_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "tasklog-server starting");
    if cfg.jwt_secret == DEFAULT_JWT_SECRET {
        warn!("TASKLOG_JWT_SECRET is not set; using the built-in development secret");
    }

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = SqliteStore::connect(
        &cfg.database_url,
        Duration::from_millis(cfg.store_timeout_ms),
    )
    .await?;
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Shared application state ────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let cache_store = cache_store(&cfg, Arc::clone(&clock))?;
    let state = Arc::new(AppState::new(
        cfg.clone(),
        Arc::new(store),
        cache_store,
        clock,
    ));

    // ── 5. Snapshot scheduler ──────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = state.scheduler.clone().spawn(shutdown_rx);

    // ── 6. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = cfg.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    if shutdown_tx.send(true).is_err() {
        warn!("snapshot scheduler already stopped");
    }
    if let Err(e) = scheduler.await {
        warn!(error = %e, "snapshot scheduler task failed");
    }

    info!("tasklog-server stopped");
    Ok(())
}

/// Redis when configured and compiled in, otherwise the in-process store.
fn cache_store(cfg: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<dyn CacheStore>> {
    #[cfg(feature = "redis")]
    if let Some(url) = cfg.redis_url.as_deref() {
        let store = tasklog_core::cache::RedisCacheStore::from_url(url)?;
        info!("using Redis cache store");
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "redis"))]
    if cfg.redis_url.is_some() {
        warn!("TASKLOG_REDIS_URL is set but the `redis` feature is disabled; using in-process cache");
    }

    Ok(Arc::new(MemoryCacheStore::new(clock)))
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c   => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
