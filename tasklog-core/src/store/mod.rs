//! Persistence layer.
//!
//! [`TaskStore`] is the only way the audit core touches tasks and snapshots.
//! Two implementations ship with the crate: [`memory::MemoryStore`] for tests
//! and single-process deployments, and [`sqlite::SqliteStore`] backed by
//! `sqlx`.
//!
//! Both enforce the (task, date) uniqueness of snapshots inside the store, so
//! [`TaskStore::insert_snapshot_if_absent`] is a single atomic call and never
//! a query followed by an insert.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::model::{
    NewTask, PageQuery, Snapshot, SnapshotDetail, SnapshotId, SnapshotRow, Task, TaskId,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// The call did not finish within the configured bound.
    #[error("store call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// An injected or otherwise transient failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Every task whose `active` flag is set.
    async fn list_active_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Insert a snapshot unless one already exists for `(task_id, date)`.
    ///
    /// Returns `true` when a row was written. A uniqueness conflict is not an
    /// error.
    async fn insert_snapshot_if_absent(
        &self,
        task_id: TaskId,
        date: NaiveDate,
        status: bool,
    ) -> Result<bool, StoreError>;

    /// Rows for one page ordered by logged date descending, then id
    /// ascending, plus the total number of matching rows.
    async fn query_page(&self, query: &PageQuery) -> Result<(Vec<SnapshotRow>, u64), StoreError>;

    /// A single snapshot joined with its task.
    async fn get_snapshot(&self, id: SnapshotId) -> Result<Option<SnapshotDetail>, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Snapshots recorded for `date`, ordered by id.
    async fn snapshots_on(&self, date: NaiveDate) -> Result<Vec<Snapshot>, StoreError>;

    // ── CRUD-layer hooks ─────────────────────────────────────────────────────

    async fn insert_task(&self, task: NewTask) -> Result<Task, StoreError>;

    /// Returns `false` when the task does not exist.
    async fn set_task_active(&self, id: TaskId, active: bool) -> Result<bool, StoreError>;

    /// Deletes the task and, by cascade, its snapshots.
    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError>;
}
