//! Daily snapshot cadence.
//!
//! The loop wakes on a fixed tick and runs the engine once the UTC wall
//! clock has passed the configured time of day and today has not been run
//! yet. A process that starts after the firing time therefore catches up on
//! its first tick; the engine's idempotency makes that harmless.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, info_span};

use crate::clock::Clock;
use crate::error::Error;
use crate::snapshot::SnapshotEngine;

const DEFAULT_TICK: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Scheduler {
    engine: SnapshotEngine,
    clock: Arc<dyn Clock>,
    fire_at: NaiveTime,
    tick: Duration,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("fire_at", &self.fire_at)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Fires at 00:00 UTC.
    pub fn new(engine: SnapshotEngine, clock: Arc<dyn Clock>) -> Self {
        Self {
            engine,
            clock,
            fire_at: NaiveTime::MIN,
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_fire_at(mut self, fire_at: NaiveTime) -> Self {
        self.fire_at = fire_at;
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn fire_at(&self) -> NaiveTime {
        self.fire_at
    }

    /// The first firing instant strictly after `now`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.fire_at).and_utc();
        if today > now {
            return today;
        }
        now.date_naive()
            .checked_add_days(Days::new(1))
            .map(|d| d.and_time(self.fire_at).and_utc())
            .unwrap_or(today)
    }

    fn is_due(&self, now: DateTime<Utc>, last_run: Option<NaiveDate>) -> bool {
        now.time() >= self.fire_at && last_run != Some(now.date_naive())
    }

    /// Run the snapshot for the clock's current day and wait for it.
    pub async fn trigger(&self) -> Result<u64, Error> {
        self.engine.run_snapshot(self.clock.today()).await
    }

    /// Run the snapshot for `date`, e.g. to backfill a missed day.
    pub async fn trigger_for(&self, date: NaiveDate) -> Result<u64, Error> {
        self.engine.run_snapshot(date).await
    }

    /// Start a run for today in the background. Failures are logged.
    pub fn trigger_detached(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(
            async move {
                match this.trigger().await {
                    Ok(written) => info!(written, "manual snapshot run finished"),
                    Err(e) => error!(error = %e, "manual snapshot run failed"),
                }
            }
            .instrument(info_span!("manual_snapshot")),
        )
    }

    /// Start the background loop. It exits when `shutdown` flips to `true`
    /// or its sender is dropped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let span = info_span!("snapshot_scheduler");
        tokio::spawn(
            async move {
                info!(
                    fire_at = %self.fire_at,
                    next = %self.next_fire_after(self.clock.now()),
                    "snapshot scheduler started"
                );
                let mut interval = tokio::time::interval(self.tick);
                let mut last_run: Option<NaiveDate> = None;

                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                    }

                    let now = self.clock.now();
                    if !self.is_due(now, last_run) {
                        continue;
                    }

                    let today = now.date_naive();
                    // A failed run is not retried until the next day.
                    last_run = Some(today);
                    match self.engine.run_snapshot(today).await {
                        Ok(written) => info!(%today, written, "scheduled snapshot run finished"),
                        Err(e) => error!(%today, error = %e, "scheduled snapshot run failed"),
                    }
                }
                info!("snapshot scheduler stopped");
            }
            .instrument(span),
        )
    }
}
