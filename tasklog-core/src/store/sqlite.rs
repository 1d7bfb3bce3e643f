//! SQLite implementation of [`TaskStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature. Migrations under
//! `tasklog-core/migrations` are embedded at compile time and run by
//! [`SqliteStore::connect`].
//!
//! The `(task_id, logged_date)` UNIQUE constraint backs
//! [`TaskStore::insert_snapshot_if_absent`], which is a single
//! `INSERT … ON CONFLICT DO NOTHING`. Every call is bounded by a timeout that
//! surfaces as [`StoreError::Timeout`].
//!
//! Queries use the runtime-checked `sqlx::query` form so no `DATABASE_URL` is
//! needed at compile time.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::{StoreError, TaskStore};
use crate::model::{
    DATE_FORMAT, NewTask, PageQuery, Priority, Snapshot, SnapshotDetail, SnapshotId, SnapshotRow,
    Task, TaskDetail, TaskId, TaskSummary,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

type TaskRow = (i64, String, Option<String>, bool, String, String, Option<i64>);
type ListRow = (i64, i64, String, bool, String, Option<String>);
type DetailRow = (i64, String, bool, i64, String, Option<String>, String, String, Option<i64>);

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    timeout: Duration,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `url` is a sqlx SQLite URL such as `"sqlite://tasklog.db"` or
    /// `"sqlite::memory:"`. In-memory databases are pinned to a single
    /// connection so every query sees the same data.
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(%url, in_memory, "sqlite store ready");
        Ok(Self { pool, timeout })
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn decode_date(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| StoreError::Corrupt(format!("bad date '{raw}': {e}")))
}

fn decode_priority(raw: &str) -> Result<Priority, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Corrupt(format!("bad priority '{raw}'")))
}

fn decode_task(row: TaskRow) -> Result<Task, StoreError> {
    let (id, name, description, active, priority, created_on, owner_id) = row;
    Ok(Task {
        id,
        name,
        description,
        active,
        priority: decode_priority(&priority)?,
        created_on: decode_date(&created_on)?,
        owner_id,
    })
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn list_active_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let rows: Vec<TaskRow> = self
            .bounded(
                sqlx::query_as(
                    "SELECT id, name, description, active, priority, created_on, owner_id \
                     FROM tasks WHERE active = 1 ORDER BY id",
                )
                .fetch_all(&self.pool),
            )
            .await?;
        rows.into_iter().map(decode_task).collect()
    }

    async fn insert_snapshot_if_absent(
        &self,
        task_id: TaskId,
        date: NaiveDate,
        status: bool,
    ) -> Result<bool, StoreError> {
        let result = self
            .bounded(
                sqlx::query(
                    "INSERT INTO task_snapshots (task_id, logged_date, status) \
                     VALUES (?1, ?2, ?3) \
                     ON CONFLICT (task_id, logged_date) DO NOTHING",
                )
                .bind(task_id)
                .bind(format_date(date))
                .bind(status)
                .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn query_page(&self, query: &PageQuery) -> Result<(Vec<SnapshotRow>, u64), StoreError> {
        let limit = i64::from(query.per_page());
        let offset = i64::try_from(query.offset())
            .map_err(|_| StoreError::Corrupt("page offset overflow".to_owned()))?;

        let (rows, total): (Vec<ListRow>, i64) = if let Some(date) = query.date() {
            let date = format_date(date);
            let rows: Vec<ListRow> = self
                .bounded(
                    sqlx::query_as(
                        "SELECT s.id, s.task_id, s.logged_date, s.status, t.name, t.description \
                         FROM task_snapshots s JOIN tasks t ON t.id = s.task_id \
                         WHERE s.logged_date = ?1 \
                         ORDER BY s.logged_date DESC, s.id ASC LIMIT ?2 OFFSET ?3",
                    )
                    .bind(&date)
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool),
                )
                .await?;
            let (total,): (i64,) = self
                .bounded(
                    sqlx::query_as("SELECT COUNT(*) FROM task_snapshots WHERE logged_date = ?1")
                        .bind(&date)
                        .fetch_one(&self.pool),
                )
                .await?;
            (rows, total)
        } else {
            let rows: Vec<ListRow> = self
                .bounded(
                    sqlx::query_as(
                        "SELECT s.id, s.task_id, s.logged_date, s.status, t.name, t.description \
                         FROM task_snapshots s JOIN tasks t ON t.id = s.task_id \
                         ORDER BY s.logged_date DESC, s.id ASC LIMIT ?1 OFFSET ?2",
                    )
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool),
                )
                .await?;
            let (total,): (i64,) = self
                .bounded(sqlx::query_as("SELECT COUNT(*) FROM task_snapshots").fetch_one(&self.pool))
                .await?;
            (rows, total)
        };

        let rows = rows
            .into_iter()
            .map(|(id, task_id, logged_date, status, task_name, description)| -> Result<SnapshotRow, StoreError> {
                Ok(SnapshotRow {
                    id,
                    task_id,
                    date_logged: decode_date(&logged_date)?,
                    status,
                    task: TaskSummary {
                        task_name,
                        description,
                    },
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok((rows, u64::try_from(total).unwrap_or(0)))
    }

    async fn get_snapshot(&self, id: SnapshotId) -> Result<Option<SnapshotDetail>, StoreError> {
        let row: Option<DetailRow> = self
            .bounded(
                sqlx::query_as(
                    "SELECT s.id, s.logged_date, s.status, \
                            t.id, t.name, t.description, t.priority, t.created_on, t.owner_id \
                     FROM task_snapshots s JOIN tasks t ON t.id = s.task_id \
                     WHERE s.id = ?1",
                )
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;

        row.map(
            |(log_id, logged_date, status, task_id, name, description, priority, created_on, owner_id)|
             -> Result<SnapshotDetail, StoreError> {
                Ok(SnapshotDetail {
                    log_id,
                    date_logged: decode_date(&logged_date)?,
                    status,
                    task: TaskDetail {
                        id: task_id,
                        task_name: name,
                        description,
                        priority: decode_priority(&priority)?,
                        created_at: decode_date(&created_on)?,
                        owner_id,
                    },
                })
            },
        )
        .transpose()
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let row: Option<TaskRow> = self
            .bounded(
                sqlx::query_as(
                    "SELECT id, name, description, active, priority, created_on, owner_id \
                     FROM tasks WHERE id = ?1",
                )
                .bind(id)
                .fetch_optional(&self.pool),
            )
            .await?;
        row.map(decode_task).transpose()
    }

    async fn snapshots_on(&self, date: NaiveDate) -> Result<Vec<Snapshot>, StoreError> {
        let rows: Vec<(i64, i64, String, bool)> = self
            .bounded(
                sqlx::query_as(
                    "SELECT id, task_id, logged_date, status FROM task_snapshots \
                     WHERE logged_date = ?1 ORDER BY id",
                )
                .bind(format_date(date))
                .fetch_all(&self.pool),
            )
            .await?;
        rows.into_iter()
            .map(|(id, task_id, logged_date, status)| -> Result<Snapshot, StoreError> {
                Ok(Snapshot {
                    id,
                    task_id,
                    logged_date: decode_date(&logged_date)?,
                    status,
                })
            })
            .collect()
    }

    async fn insert_task(&self, task: NewTask) -> Result<Task, StoreError> {
        let result = self
            .bounded(
                sqlx::query(
                    "INSERT INTO tasks (name, description, active, priority, created_on, owner_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .bind(&task.name)
                .bind(&task.description)
                .bind(task.active)
                .bind(task.priority.as_str())
                .bind(format_date(task.created_on))
                .bind(task.owner_id)
                .execute(&self.pool),
            )
            .await?;
        Ok(Task {
            id: result.last_insert_rowid(),
            name: task.name,
            description: task.description,
            active: task.active,
            priority: task.priority,
            created_on: task.created_on,
            owner_id: task.owner_id,
        })
    }

    async fn set_task_active(&self, id: TaskId, active: bool) -> Result<bool, StoreError> {
        let result = self
            .bounded(
                sqlx::query("UPDATE tasks SET active = ?1 WHERE id = ?2")
                    .bind(active)
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError> {
        let result = self
            .bounded(
                sqlx::query("DELETE FROM tasks WHERE id = ?1")
                    .bind(id)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::snapshot::SnapshotEngine;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    async fn memory_store() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:", DEFAULT_TIMEOUT)
            .await
            .expect("in-memory sqlite")
    }

    #[tokio::test]
    async fn unique_constraint_backs_conditional_insert() {
        let store = memory_store().await;
        let task = store
            .insert_task(NewTask::active("write report", day(1)).with_description("weekly"))
            .await
            .unwrap();

        assert!(store.insert_snapshot_if_absent(task.id, day(2), true).await.unwrap());
        assert!(!store.insert_snapshot_if_absent(task.id, day(2), true).await.unwrap());
        assert_eq!(store.snapshots_on(day(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn page_is_ordered_by_date_desc_then_id() {
        let store = memory_store().await;
        let a = store.insert_task(NewTask::active("a", day(1))).await.unwrap();
        let b = store.insert_task(NewTask::active("b", day(1))).await.unwrap();
        store.insert_snapshot_if_absent(a.id, day(2), true).await.unwrap();
        store.insert_snapshot_if_absent(b.id, day(3), true).await.unwrap();
        store.insert_snapshot_if_absent(a.id, day(3), true).await.unwrap();

        let query = PageQuery::new(None, 1, 10).unwrap();
        let (rows, total) = store.query_page(&query).await.unwrap();
        assert_eq!(total, 3);
        let order: Vec<(NaiveDate, i64)> = rows.iter().map(|r| (r.date_logged, r.id)).collect();
        assert_eq!(order, vec![(day(3), 2), (day(3), 3), (day(2), 1)]);
        assert_eq!(rows[0].task.task_name, "b");

        let query = PageQuery::new(Some(day(2)), 1, 10).unwrap();
        let (rows, total) = store.query_page(&query).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].task_id, a.id);
    }

    #[tokio::test]
    async fn snapshot_detail_joins_task() {
        let store = memory_store().await;
        let task = store.insert_task(NewTask::active("a", day(1))).await.unwrap();
        store.insert_snapshot_if_absent(task.id, day(2), true).await.unwrap();

        let detail = store.get_snapshot(1).await.unwrap().expect("snapshot 1");
        assert_eq!(detail.log_id, 1);
        assert_eq!(detail.task.id, task.id);
        assert_eq!(detail.task.priority, Priority::Medium);
        assert_eq!(detail.task.created_at, day(1));
        assert!(store.get_snapshot(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deleting_task_cascades() {
        let store = memory_store().await;
        let task = store.insert_task(NewTask::active("a", day(1))).await.unwrap();
        store.insert_snapshot_if_absent(task.id, day(2), true).await.unwrap();

        assert!(store.delete_task(task.id).await.unwrap());
        assert!(store.snapshots_on(day(2)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn inactive_tasks_are_not_listed() {
        let store = memory_store().await;
        store.insert_task(NewTask::active("on", day(1))).await.unwrap();
        store
            .insert_task(NewTask::active("off", day(1)).inactive())
            .await
            .unwrap();

        let active = store.list_active_tasks().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "on");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_runs_on_pooled_file_write_one_row_per_task() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("tasklog.db").display());
        let store = Arc::new(SqliteStore::connect(&url, DEFAULT_TIMEOUT).await.unwrap());
        for i in 0..20 {
            store
                .insert_task(NewTask::active(format!("task-{i}"), day(1)))
                .await
                .unwrap();
        }
        let active = store.list_active_tasks().await.unwrap().len();

        let engine = SnapshotEngine::new(store.clone());
        let runs: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.run_snapshot(day(5)).await })
            })
            .collect();
        let mut written = 0;
        for run in runs {
            written += run.await.unwrap().unwrap();
        }

        assert_eq!(written, active as u64);
        assert_eq!(store.snapshots_on(day(5)).await.unwrap().len(), active);
    }
}
