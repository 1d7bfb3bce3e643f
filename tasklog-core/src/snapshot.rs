use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::store::TaskStore;

/// Records one status snapshot per active task per day.
///
/// Runs are idempotent: rerunning for the same day, or running several times
/// concurrently, never produces more than one row per `(task, day)`. The
/// guarantee comes from [`TaskStore::insert_snapshot_if_absent`], so the
/// engine itself holds no lock.
#[derive(Clone)]
pub struct SnapshotEngine {
    store: Arc<dyn TaskStore>,
}

impl std::fmt::Debug for SnapshotEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotEngine").finish_non_exhaustive()
    }
}

impl SnapshotEngine {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Snapshot every active task for `as_of` and return the number of rows
    /// actually written.
    ///
    /// A store failure part-way through stops the batch and is reported as
    /// [`Error::SnapshotFailed`]; rows written before it stay committed and a
    /// rerun picks up the rest.
    #[tracing::instrument(skip(self), fields(date = %as_of))]
    pub async fn run_snapshot(&self, as_of: NaiveDate) -> Result<u64, Error> {
        let tasks = self
            .store
            .list_active_tasks()
            .await
            .map_err(|e| Error::SnapshotFailed {
                written: 0,
                reason: e.to_string(),
            })?;

        let mut written = 0u64;
        for task in &tasks {
            match self
                .store
                .insert_snapshot_if_absent(task.id, as_of, task.active)
                .await
            {
                Ok(true) => written += 1,
                Ok(false) => debug!(task_id = task.id, "snapshot already present"),
                Err(e) => {
                    warn!(task_id = task.id, written, error = %e, "snapshot run aborted");
                    return Err(Error::SnapshotFailed {
                        written,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(active = tasks.len(), written, "snapshot run complete");
        Ok(written)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::NewTask;
    use crate::store::MemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    async fn seeded(active: usize, inactive: usize) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for i in 0..active {
            store
                .insert_task(NewTask::active(format!("active-{i}"), day(1)))
                .await
                .unwrap();
        }
        for i in 0..inactive {
            store
                .insert_task(NewTask::active(format!("idle-{i}"), day(1)).inactive())
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn second_run_writes_nothing() {
        let store = seeded(3, 2).await;
        let engine = SnapshotEngine::new(store.clone());

        assert_eq!(engine.run_snapshot(day(7)).await.unwrap(), 3);
        assert_eq!(engine.run_snapshot(day(7)).await.unwrap(), 0);
        assert_eq!(store.snapshot_count().await, 3);

        let rows = store.snapshots_on(day(7)).await.unwrap();
        assert!(rows.iter().all(|s| s.status));
    }

    #[tokio::test]
    async fn each_day_gets_its_own_rows() {
        let store = seeded(2, 0).await;
        let engine = SnapshotEngine::new(store.clone());

        engine.run_snapshot(day(7)).await.unwrap();
        engine.run_snapshot(day(8)).await.unwrap();
        assert_eq!(store.snapshot_count().await, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_runs_write_one_row_per_task() {
        let store = seeded(5, 1).await;
        let engine = SnapshotEngine::new(store.clone());

        let runs: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.run_snapshot(day(9)).await })
            })
            .collect();

        let mut total = 0;
        for run in futures::future::join_all(runs).await {
            total += run.unwrap().unwrap();
        }
        assert_eq!(total, 5);
        assert_eq!(store.snapshot_count().await, 5);
    }

    #[tokio::test]
    async fn partial_failure_reports_progress_and_rerun_completes() {
        let store = seeded(4, 0).await;
        let engine = SnapshotEngine::new(store.clone());
        store.fail_inserts_after(2).await;

        match engine.run_snapshot(day(10)).await {
            Err(Error::SnapshotFailed { written, .. }) => assert_eq!(written, 2),
            other => panic!("expected SnapshotFailed, got {other:?}"),
        }
        assert_eq!(store.snapshot_count().await, 2);

        store.clear_faults().await;
        assert_eq!(engine.run_snapshot(day(10)).await.unwrap(), 2);
        assert_eq!(store.snapshot_count().await, 4);
    }

    #[tokio::test]
    async fn unavailable_store_fails_before_writing() {
        let store = seeded(1, 0).await;
        let engine = SnapshotEngine::new(store.clone());
        store.set_unavailable(true).await;

        assert!(matches!(
            engine.run_snapshot(day(11)).await,
            Err(Error::SnapshotFailed { written: 0, .. })
        ));
    }
}
