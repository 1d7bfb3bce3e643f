//! In-process implementation of [`TaskStore`].
//!
//! All state sits behind one `tokio::sync::RwLock`. The uniqueness index
//! `(task_id, date) → snapshot_id` is checked and updated inside a single
//! write-lock critical section, which makes the conditional insert atomic.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use super::{StoreError, TaskStore};
use crate::model::{
    NewTask, PageQuery, Snapshot, SnapshotDetail, SnapshotId, SnapshotRow, Task, TaskDetail,
    TaskId, TaskSummary,
};

#[derive(Debug, Default)]
struct Inner {
    tasks: BTreeMap<TaskId, Task>,
    snapshots: BTreeMap<SnapshotId, Snapshot>,
    unique: HashMap<(TaskId, NaiveDate), SnapshotId>,
    next_task_id: TaskId,
    next_snapshot_id: SnapshotId,
    /// Remaining snapshot inserts before injected failures start.
    insert_budget: Option<usize>,
    unavailable: bool,
}

impl Inner {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_owned()));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` more snapshot inserts through, then fail every insert until
    /// [`Self::clear_faults`] is called.
    pub async fn fail_inserts_after(&self, n: usize) {
        self.inner.write().await.insert_budget = Some(n);
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.write().await.unavailable = unavailable;
    }

    pub async fn clear_faults(&self) {
        let mut inner = self.inner.write().await;
        inner.insert_budget = None;
        inner.unavailable = false;
    }

    pub async fn snapshot_count(&self) -> usize {
        self.inner.read().await.snapshots.len()
    }
}

fn to_row(snapshot: &Snapshot, task: &Task) -> SnapshotRow {
    SnapshotRow {
        id: snapshot.id,
        task_id: snapshot.task_id,
        date_logged: snapshot.logged_date,
        status: snapshot.status,
        task: TaskSummary {
            task_name: task.name.clone(),
            description: task.description.clone(),
        },
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn list_active_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.read().await;
        inner.check_available()?;
        Ok(inner.tasks.values().filter(|t| t.active).cloned().collect())
    }

    async fn insert_snapshot_if_absent(
        &self,
        task_id: TaskId,
        date: NaiveDate,
        status: bool,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_available()?;

        match inner.insert_budget {
            Some(0) => {
                return Err(StoreError::Unavailable("injected insert failure".to_owned()));
            }
            Some(ref mut left) => *left -= 1,
            None => {}
        }

        if !inner.tasks.contains_key(&task_id) {
            return Err(StoreError::Corrupt(format!("task {task_id} does not exist")));
        }
        if inner.unique.contains_key(&(task_id, date)) {
            return Ok(false);
        }

        inner.next_snapshot_id += 1;
        let id = inner.next_snapshot_id;
        inner.unique.insert((task_id, date), id);
        inner.snapshots.insert(
            id,
            Snapshot {
                id,
                task_id,
                logged_date: date,
                status,
            },
        );
        Ok(true)
    }

    async fn query_page(&self, query: &PageQuery) -> Result<(Vec<SnapshotRow>, u64), StoreError> {
        let inner = self.inner.read().await;
        inner.check_available()?;

        let mut matching: Vec<&Snapshot> = inner
            .snapshots
            .values()
            .filter(|s| query.date().is_none_or(|d| s.logged_date == d))
            .collect();
        matching.sort_by(|a, b| b.logged_date.cmp(&a.logged_date).then(a.id.cmp(&b.id)));

        let total = matching.len() as u64;
        let rows = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.per_page() as usize)
            .map(|s| {
                inner
                    .tasks
                    .get(&s.task_id)
                    .map(|task| to_row(s, task))
                    .ok_or_else(|| StoreError::Corrupt(format!("snapshot {} has no task", s.id)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((rows, total))
    }

    async fn get_snapshot(&self, id: SnapshotId) -> Result<Option<SnapshotDetail>, StoreError> {
        let inner = self.inner.read().await;
        inner.check_available()?;

        let Some(snapshot) = inner.snapshots.get(&id) else {
            return Ok(None);
        };
        let task = inner
            .tasks
            .get(&snapshot.task_id)
            .ok_or_else(|| StoreError::Corrupt(format!("snapshot {id} has no task")))?;
        Ok(Some(SnapshotDetail {
            log_id: snapshot.id,
            date_logged: snapshot.logged_date,
            status: snapshot.status,
            task: TaskDetail {
                id: task.id,
                task_name: task.name.clone(),
                description: task.description.clone(),
                priority: task.priority,
                created_at: task.created_on,
                owner_id: task.owner_id,
            },
        }))
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.read().await;
        inner.check_available()?;
        Ok(inner.tasks.get(&id).cloned())
    }

    async fn snapshots_on(&self, date: NaiveDate) -> Result<Vec<Snapshot>, StoreError> {
        let inner = self.inner.read().await;
        inner.check_available()?;
        Ok(inner
            .snapshots
            .values()
            .filter(|s| s.logged_date == date)
            .cloned()
            .collect())
    }

    async fn insert_task(&self, task: NewTask) -> Result<Task, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_available()?;
        inner.next_task_id += 1;
        let task = Task {
            id: inner.next_task_id,
            name: task.name,
            description: task.description,
            active: task.active,
            priority: task.priority,
            created_on: task.created_on,
            owner_id: task.owner_id,
        };
        inner.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn set_task_active(&self, id: TaskId, active: bool) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_available()?;
        match inner.tasks.get_mut(&id) {
            Some(task) => {
                task.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_available()?;
        if inner.tasks.remove(&id).is_none() {
            return Ok(false);
        }
        let orphaned: Vec<SnapshotId> = inner
            .snapshots
            .values()
            .filter(|s| s.task_id == id)
            .map(|s| s.id)
            .collect();
        for snapshot_id in orphaned {
            if let Some(s) = inner.snapshots.remove(&snapshot_id) {
                inner.unique.remove(&(s.task_id, s.logged_date));
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, d).unwrap()
    }

    #[tokio::test]
    async fn conditional_insert_rejects_duplicate_key() {
        let store = MemoryStore::new();
        let task = store.insert_task(NewTask::active("a", day(1))).await.unwrap();

        assert!(store.insert_snapshot_if_absent(task.id, day(2), true).await.unwrap());
        assert!(!store.insert_snapshot_if_absent(task.id, day(2), true).await.unwrap());
        assert!(store.insert_snapshot_if_absent(task.id, day(3), true).await.unwrap());
        assert_eq!(store.snapshot_count().await, 2);
    }

    #[tokio::test]
    async fn delete_task_cascades_to_snapshots() {
        let store = MemoryStore::new();
        let keep = store.insert_task(NewTask::active("keep", day(1))).await.unwrap();
        let gone = store.insert_task(NewTask::active("gone", day(1))).await.unwrap();
        store.insert_snapshot_if_absent(keep.id, day(2), true).await.unwrap();
        store.insert_snapshot_if_absent(gone.id, day(2), true).await.unwrap();

        assert!(store.delete_task(gone.id).await.unwrap());
        let left = store.snapshots_on(day(2)).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].task_id, keep.id);
        assert!(!store.delete_task(gone.id).await.unwrap());
    }

    #[tokio::test]
    async fn injected_insert_failures_start_after_budget() {
        let store = MemoryStore::new();
        let task = store.insert_task(NewTask::active("a", day(1))).await.unwrap();
        store.fail_inserts_after(1).await;

        assert!(store.insert_snapshot_if_absent(task.id, day(2), true).await.is_ok());
        assert!(matches!(
            store.insert_snapshot_if_absent(task.id, day(3), true).await,
            Err(StoreError::Unavailable(_))
        ));

        store.clear_faults().await;
        assert!(store.insert_snapshot_if_absent(task.id, day(3), true).await.unwrap());
    }

    #[tokio::test]
    async fn only_active_tasks_are_listed() {
        let store = MemoryStore::new();
        store.insert_task(NewTask::active("on", day(1))).await.unwrap();
        let off = store.insert_task(NewTask::active("off", day(1))).await.unwrap();
        store.set_task_active(off.id, false).await.unwrap();

        let active = store.list_active_tasks().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "on");
    }
}
