//! `TaskStore`: durable JSON persistence for Task/TaskList, one document
//! per entity, with consistency invariants enforced on every save.

use super::lease::{Lease, LeaseManager};
use super::types::{Task, TaskList, TaskListStatus, TaskStatus};
use crate::errors::{TaskStoreError, TaskStoreResult};
use crate::events::{EventBus, EventEnvelope, EventKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::instrument;

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Index {
    task_lists: Vec<String>,
}

pub struct TaskStore {
    base_path: PathBuf,
    leases: LeaseManager,
    events: EventBus,
    /// In-memory mirror guarded by a coarse read-write lock; the
    /// authoritative lock is per-entity on disk, but the cache avoids a full
    /// directory re-read on every query.
    cache: RwLock<Cache>,
}

#[derive(Default)]
struct Cache {
    tasks: std::collections::HashMap<String, Task>,
    lists: std::collections::HashMap<String, TaskList>,
}

impl TaskStore {
    pub async fn open(config: &crate::config::TaskStoreConfig, events: EventBus) -> TaskStoreResult<Self> {
        tokio::fs::create_dir_all(&config.base_path).await?;
        tokio::fs::create_dir_all(config.base_path.join("tasks")).await?;
        tokio::fs::create_dir_all(config.base_path.join("lists")).await?;
        let store = Self {
            base_path: config.base_path.clone(),
            leases: LeaseManager::new(&config.base_path, config.lock_staleness()),
            events,
            cache: RwLock::new(Cache::default()),
        };
        store.load_all().await?;
        Ok(store)
    }

    fn task_path(&self, id: &str) -> PathBuf {
        self.base_path.join("tasks").join(format!("{id}.json"))
    }

    fn list_path(&self, id: &str) -> PathBuf {
        self.base_path.join("lists").join(format!("{id}.json"))
    }

    fn index_path(&self) -> PathBuf {
        self.base_path.join("index.json")
    }

    async fn load_all(&self) -> TaskStoreResult<()> {
        let index = self.read_index().await?;
        let mut cache = self.cache.write().await;
        for list_id in &index.task_lists {
            if let Ok(contents) = tokio::fs::read(self.list_path(list_id)).await {
                if let Ok(list) = serde_json::from_slice::<TaskList>(&contents) {
                    for task_id in &list.task_ids {
                        if let Ok(contents) = tokio::fs::read(self.task_path(task_id)).await {
                            if let Ok(task) = serde_json::from_slice::<Task>(&contents) {
                                cache.tasks.insert(task.id.clone(), task);
                            }
                        }
                    }
                    cache.lists.insert(list.id.clone(), list);
                }
            }
        }
        Ok(())
    }

    async fn read_index(&self) -> TaskStoreResult<Index> {
        match tokio::fs::read(self.index_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Index::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_index(&self, index: &Index) -> TaskStoreResult<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        tokio::fs::write(self.index_path(), bytes).await?;
        Ok(())
    }

    async fn write_task(&self, task: &Task) -> TaskStoreResult<()> {
        let bytes = serde_json::to_vec_pretty(task)?;
        tokio::fs::write(self.task_path(&task.id), bytes).await?;
        Ok(())
    }

    async fn write_list(&self, list: &TaskList) -> TaskStoreResult<()> {
        let bytes = serde_json::to_vec_pretty(list)?;
        tokio::fs::write(self.list_path(&list.id), bytes).await?;
        Ok(())
    }

    pub async fn acquire_lock(&self, entity_id: &str, timeout_ms: u64) -> TaskStoreResult<Lease> {
        self.leases.acquire(entity_id, std::time::Duration::from_millis(timeout_ms)).await
    }

    pub async fn release_lock(&self, lease: Lease) -> TaskStoreResult<()> {
        self.leases.release(lease).await
    }

    /// Sweep lock files older than the configured staleness window. Exposed
    /// so a daemon binary can schedule it periodically (SPEC_FULL §11)
    /// rather than relying on the next `acquire_lock` caller to trip it.
    pub async fn reclaim_stale_locks(&self) -> TaskStoreResult<usize> {
        self.leases.reclaim_stale_locks().await
    }

    pub async fn get_task(&self, id: &str) -> Option<Task> {
        self.cache.read().await.tasks.get(id).cloned()
    }

    pub async fn get_list(&self, id: &str) -> Option<TaskList> {
        self.cache.read().await.lists.get(id).cloned()
    }

    #[instrument(skip(self, task))]
    pub async fn create_task(&self, list_id: &str, task: Task) -> TaskStoreResult<()> {
        let lease = self.acquire_lock(&task.id, 5_000).await?;
        self.write_task(&task).await?;
        self.release_lock(lease).await?;

        {
            let mut cache = self.cache.write().await;
            cache.tasks.insert(task.id.clone(), task.clone());
            let list = cache
                .lists
                .get_mut(list_id)
                .ok_or_else(|| TaskStoreError::TaskListNotFound(list_id.to_string()))?;
            if !list.task_ids.contains(&task.id) {
                list.task_ids.push(task.id.clone());
                list.updated_at = chrono::Utc::now();
            }
            let list_snapshot = list.clone();
            drop(cache);
            self.write_list(&list_snapshot).await?;
        }

        self.events.publish(EventEnvelope::new(EventKind::TaskCreated).with_id("taskId", task.id));
        Ok(())
    }

    pub async fn create_list(&self, list: TaskList) -> TaskStoreResult<()> {
        self.write_list(&list).await?;
        let mut index = self.read_index().await?;
        if !index.task_lists.contains(&list.id) {
            index.task_lists.push(list.id.clone());
        }
        self.write_index(&index).await?;
        self.cache.write().await.lists.insert(list.id.clone(), list);
        Ok(())
    }

    /// Add a dependency `depends_on_id -> task_id`; rejects cycles.
    #[instrument(skip(self))]
    pub async fn add_dependency(&self, task_id: &str, depends_on_id: &str) -> TaskStoreResult<()> {
        if self.would_cycle(task_id, depends_on_id).await {
            return Err(TaskStoreError::CircularDependency);
        }
        let lease = self.acquire_lock(task_id, 5_000).await?;
        let result = self.apply_dependency(task_id, depends_on_id).await;
        self.release_lock(lease).await?;
        result
    }

    async fn would_cycle(&self, task_id: &str, new_dep_id: &str) -> bool {
        if task_id == new_dep_id {
            return true;
        }
        let cache = self.cache.read().await;
        let mut stack = vec![new_dep_id.to_string()];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == task_id {
                return true;
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(task) = cache.tasks.get(&current) {
                stack.extend(task.depends_on.iter().cloned());
            }
        }
        false
    }

    async fn apply_dependency(&self, task_id: &str, depends_on_id: &str) -> TaskStoreResult<()> {
        let mut cache = self.cache.write().await;
        {
            let task = cache.tasks.get_mut(task_id).ok_or_else(|| TaskStoreError::TaskNotFound(task_id.to_string()))?;
            task.depends_on.insert(depends_on_id.to_string());
            task.touch();
        }
        {
            let dep = cache
                .tasks
                .get_mut(depends_on_id)
                .ok_or_else(|| TaskStoreError::TaskNotFound(depends_on_id.to_string()))?;
            dep.blocks.insert(task_id.to_string());
            dep.touch();
        }
        let task = cache.tasks.get(task_id).unwrap().clone();
        let dep = cache.tasks.get(depends_on_id).unwrap().clone();
        drop(cache);
        self.write_task(&task).await?;
        self.write_task(&dep).await?;
        Ok(())
    }

    /// Complete a task: sets `completedAt`, then unblocks every task in its
    /// `blocks` set whose entire `dependsOn` is `done`.
    #[instrument(skip(self))]
    pub async fn complete_task(&self, task_id: &str) -> TaskStoreResult<()> {
        let lease = self.acquire_lock(task_id, 5_000).await?;
        let result = self.apply_complete(task_id).await;
        self.release_lock(lease).await?;
        result
    }

    async fn apply_complete(&self, task_id: &str) -> TaskStoreResult<()> {
        let mut cache = self.cache.write().await;
        let blocks: Vec<String> = {
            let task = cache.tasks.get_mut(task_id).ok_or_else(|| TaskStoreError::TaskNotFound(task_id.to_string()))?;
            task.status = TaskStatus::Done;
            task.completed_at = Some(chrono::Utc::now());
            task.touch();
            task.blocks.iter().cloned().collect()
        };

        let mut unblocked = Vec::new();
        for blocked_id in &blocks {
            let all_done = {
                let Some(blocked_task) = cache.tasks.get(blocked_id) else { continue };
                blocked_task
                    .depends_on
                    .iter()
                    .all(|dep_id| cache.tasks.get(dep_id).map(|d| d.status == TaskStatus::Done).unwrap_or(false))
            };
            if all_done {
                if let Some(blocked_task) = cache.tasks.get_mut(blocked_id) {
                    if blocked_task.status == TaskStatus::Blocked {
                        blocked_task.status = TaskStatus::Open;
                        blocked_task.touch();
                        unblocked.push(blocked_id.clone());
                    }
                }
            }
        }

        let task_snapshot = cache.tasks.get(task_id).unwrap().clone();
        let unblocked_snapshots: Vec<Task> = unblocked.iter().filter_map(|id| cache.tasks.get(id).cloned()).collect();
        drop(cache);

        self.write_task(&task_snapshot).await?;
        for task in &unblocked_snapshots {
            self.write_task(task).await?;
        }
        self.events.publish(EventEnvelope::new(EventKind::TaskStatusChanged).with_id("taskId", task_id));
        self.maybe_complete_lists().await?;
        Ok(())
    }

    /// Delete a task, removing it from every list and rewriting the
    /// symmetric `blocks`/`dependsOn` of its neighbors.
    #[instrument(skip(self))]
    pub async fn delete_task(&self, task_id: &str) -> TaskStoreResult<()> {
        let mut cache = self.cache.write().await;
        let Some(task) = cache.tasks.remove(task_id) else {
            return Err(TaskStoreError::TaskNotFound(task_id.to_string()));
        };

        let mut touched = Vec::new();
        for dep_id in &task.depends_on {
            if let Some(dep) = cache.tasks.get_mut(dep_id) {
                dep.blocks.remove(task_id);
                dep.touch();
                touched.push(dep.clone());
            }
        }
        for blocked_id in &task.blocks {
            if let Some(blocked) = cache.tasks.get_mut(blocked_id) {
                blocked.depends_on.remove(task_id);
                blocked.touch();
                touched.push(blocked.clone());
            }
        }
        for list in cache.lists.values_mut() {
            list.task_ids.retain(|id| id != task_id);
        }
        let list_snapshots: Vec<TaskList> = cache.lists.values().cloned().collect();
        drop(cache);

        for task in &touched {
            self.write_task(task).await?;
        }
        for list in &list_snapshots {
            self.write_list(list).await?;
        }
        let _ = tokio::fs::remove_file(self.task_path(task_id)).await;
        self.events.publish(EventEnvelope::new(EventKind::TaskDeleted).with_id("taskId", task_id));
        Ok(())
    }

    async fn maybe_complete_lists(&self) -> TaskStoreResult<()> {
        let mut cache = self.cache.write().await;
        let mut changed = Vec::new();
        for list in cache.lists.values_mut() {
            if list.status != TaskListStatus::Active {
                continue;
            }
            // Note: `cache.tasks` borrow below is immutable while iterating
            // a separate map, so this is safe without re-entrant locking.
            changed.push(list.id.clone());
        }
        let tasks_snapshot = cache.tasks.clone();
        let mut to_write = Vec::new();
        for list_id in changed {
            let list = cache.lists.get_mut(&list_id).unwrap();
            let all_done = !list.task_ids.is_empty()
                && list.task_ids.iter().all(|id| tasks_snapshot.get(id).map(|t| t.status == TaskStatus::Done).unwrap_or(false));
            if all_done {
                list.status = TaskListStatus::Completed;
                list.updated_at = chrono::Utc::now();
                to_write.push(list.clone());
            }
        }
        drop(cache);
        for list in &to_write {
            self.write_list(list).await?;
            self.events.publish(EventEnvelope::new(EventKind::ListUpdated).with_id("listId", list.id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_store() -> (TaskStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::TaskStoreConfig { base_path: dir.path().to_path_buf(), lock_staleness_secs: 30 };
        let store = TaskStore::open(&config, EventBus::default()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn depends_on_and_blocks_stay_dual() {
        let (store, _dir) = make_store().await;
        store.create_list(TaskList::new("list-1", "List")).await.unwrap();
        store.create_task("list-1", Task::new("t1", "First")).await.unwrap();
        store.create_task("list-1", Task::new("t2", "Second")).await.unwrap();
        store.add_dependency("t2", "t1").await.unwrap();

        let t1 = store.get_task("t1").await.unwrap();
        let t2 = store.get_task("t2").await.unwrap();
        assert!(t1.blocks.contains("t2"));
        assert!(t2.depends_on.contains("t1"));
    }

    #[tokio::test]
    async fn cyclic_dependency_is_rejected() {
        let (store, _dir) = make_store().await;
        store.create_list(TaskList::new("list-1", "List")).await.unwrap();
        store.create_task("list-1", Task::new("t1", "First")).await.unwrap();
        store.create_task("list-1", Task::new("t2", "Second")).await.unwrap();
        store.add_dependency("t2", "t1").await.unwrap();
        let result = store.add_dependency("t1", "t2").await;
        assert!(matches!(result, Err(TaskStoreError::CircularDependency)));
    }

    #[tokio::test]
    async fn completing_a_task_unblocks_dependents() {
        let (store, _dir) = make_store().await;
        store.create_list(TaskList::new("list-1", "List")).await.unwrap();
        store.create_task("list-1", Task::new("t1", "First")).await.unwrap();
        let mut blocked = Task::new("t2", "Second");
        blocked.status = TaskStatus::Blocked;
        store.create_task("list-1", blocked).await.unwrap();
        store.add_dependency("t2", "t1").await.unwrap();

        store.complete_task("t1").await.unwrap();
        let t2 = store.get_task("t2").await.unwrap();
        assert_eq!(t2.status, TaskStatus::Open);
    }

    #[tokio::test]
    async fn list_completes_once_every_task_is_done() {
        let (store, _dir) = make_store().await;
        store.create_list(TaskList::new("list-1", "List")).await.unwrap();
        store.create_task("list-1", Task::new("t1", "First")).await.unwrap();
        store.complete_task("t1").await.unwrap();
        let list = store.get_list("list-1").await.unwrap();
        assert_eq!(list.status, TaskListStatus::Completed);
    }

    #[tokio::test]
    async fn deleting_a_task_rewrites_neighbor_edges() {
        let (store, _dir) = make_store().await;
        store.create_list(TaskList::new("list-1", "List")).await.unwrap();
        store.create_task("list-1", Task::new("t1", "First")).await.unwrap();
        store.create_task("list-1", Task::new("t2", "Second")).await.unwrap();
        store.add_dependency("t2", "t1").await.unwrap();

        store.delete_task("t1").await.unwrap();
        let t2 = store.get_task("t2").await.unwrap();
        assert!(t2.depends_on.is_empty());
        let list = store.get_list("list-1").await.unwrap();
        assert!(!list.task_ids.contains(&"t1".to_string()));
    }
}
