use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use tianyi_store::UploadStateStore;

use crate::TaskError;
use crate::task::{Task, TaskInfo, TaskStatus, TaskType};

/// Progress callback; receives a snapshot, never the live task.
pub type ProgressCallback = Box<dyn Fn(TaskInfo) + Send + Sync>;

/// Engine configuration.
pub struct ManagerOptions {
    /// Maximum simultaneously running transfers.
    pub max_concurrent: usize,
    /// Durable resume records for uploads; `None` disables resume.
    pub upload_state_store: Option<Arc<dyn UploadStateStore>>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            upload_state_store: None,
        }
    }
}

/// Transfer task manager.
///
/// Owns the task table, the concurrency gate and the progress
/// subscriber list. Cloning is cheap (shared state behind an `Arc`);
/// workers run as tokio tasks holding their own clone and coordinate
/// with the manager through task status and per-task cancel tokens.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    tasks: RwLock<HashMap<String, Arc<Task>>>,
    callbacks: RwLock<Vec<ProgressCallback>>,
    cancels: RwLock<HashMap<String, CancellationToken>>,
    semaphore: Arc<Semaphore>,
    upload_state_store: Option<Arc<dyn UploadStateStore>>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    pub fn new() -> Self {
        Self::with_options(ManagerOptions::default())
    }

    pub fn with_options(options: ManagerOptions) -> Self {
        let max_concurrent = options.max_concurrent.max(1);
        Self {
            inner: Arc::new(ManagerInner {
                tasks: RwLock::new(HashMap::new()),
                callbacks: RwLock::new(Vec::new()),
                cancels: RwLock::new(HashMap::new()),
                semaphore: Arc::new(Semaphore::new(max_concurrent)),
                upload_state_store: options.upload_state_store,
            }),
        }
    }

    /// Creates a task and inserts it into the table.
    pub(crate) fn create_task(&self, task_type: TaskType) -> Arc<Task> {
        let task = Arc::new(Task::new(&uuid::Uuid::new_v4().to_string(), task_type));
        self.inner
            .tasks
            .write()
            .unwrap()
            .insert(task.id(), Arc::clone(&task));
        task
    }

    /// Snapshot of one task.
    pub fn get(&self, task_id: &str) -> Result<TaskInfo, TaskError> {
        self.inner
            .tasks
            .read()
            .unwrap()
            .get(task_id)
            .map(|t| t.snapshot())
            .ok_or(TaskError::TaskNotFound)
    }

    /// Snapshots of all tasks.
    pub fn list(&self) -> Vec<TaskInfo> {
        self.inner
            .tasks
            .read()
            .unwrap()
            .values()
            .map(|t| t.snapshot())
            .collect()
    }

    /// Snapshots of tasks in the given status.
    pub fn list_by_status(&self, status: TaskStatus) -> Vec<TaskInfo> {
        self.inner
            .tasks
            .read()
            .unwrap()
            .values()
            .filter(|t| t.status() == status)
            .map(|t| t.snapshot())
            .collect()
    }

    /// Removes a task. Only terminal tasks can be removed.
    pub fn remove(&self, task_id: &str) -> Result<(), TaskError> {
        let mut tasks = self.inner.tasks.write().unwrap();
        let task = tasks.get(task_id).ok_or(TaskError::TaskNotFound)?;
        if !task.status().is_terminal() {
            return Err(TaskError::InvalidStatus);
        }
        tasks.remove(task_id);
        self.inner.cancels.write().unwrap().remove(task_id);
        Ok(())
    }

    /// Cancels a task: signals its token so in-flight I/O aborts, and
    /// transitions it to `Canceled`. Terminal tasks reject this.
    pub fn cancel(&self, task_id: &str) -> Result<(), TaskError> {
        let task = self.lookup(task_id)?;
        if task.status().is_terminal() {
            return Err(TaskError::InvalidStatus);
        }
        if let Some(token) = self.inner.cancels.read().unwrap().get(task_id) {
            token.cancel();
        }
        task.set_status(TaskStatus::Canceled);
        debug!(task = %task_id, "task canceled");
        self.notify(&task);
        Ok(())
    }

    /// Pauses a pending or running task.
    pub fn pause(&self, task_id: &str) -> Result<(), TaskError> {
        let task = self.lookup(task_id)?;
        let status = task.status();
        if status != TaskStatus::Running && status != TaskStatus::Pending {
            return Err(TaskError::InvalidStatus);
        }
        task.set_status(TaskStatus::Paused);
        self.notify(&task);
        Ok(())
    }

    /// Resumes a paused task; the worker picks it up at the next chunk
    /// boundary.
    pub fn resume(&self, task_id: &str) -> Result<(), TaskError> {
        let task = self.lookup(task_id)?;
        if task.status() != TaskStatus::Paused {
            return Err(TaskError::InvalidStatus);
        }
        task.set_status(TaskStatus::Pending);
        self.notify(&task);
        Ok(())
    }

    /// Registers a progress callback. Callbacks run serially on worker
    /// tasks and must be cheap.
    pub fn subscribe(&self, callback: ProgressCallback) {
        self.inner.callbacks.write().unwrap().push(callback);
    }

    pub(crate) fn notify(&self, task: &Task) {
        let snapshot = task.snapshot();
        let callbacks = self.inner.callbacks.read().unwrap();
        for callback in callbacks.iter() {
            callback(snapshot.clone());
        }
    }

    pub(crate) fn state_store(&self) -> Option<Arc<dyn UploadStateStore>> {
        self.inner.upload_state_store.clone()
    }

    pub(crate) fn lookup(&self, task_id: &str) -> Result<Arc<Task>, TaskError> {
        self.inner
            .tasks
            .read()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or(TaskError::TaskNotFound)
    }

    pub(crate) fn register_cancel(&self, task_id: &str, token: CancellationToken) {
        self.inner
            .cancels
            .write()
            .unwrap()
            .insert(task_id.to_string(), token);
    }

    pub(crate) fn unregister_cancel(&self, task_id: &str) {
        self.inner.cancels.write().unwrap().remove(task_id);
    }

    /// Waits for a run slot, bailing out if the task gets canceled
    /// while queued. A canceled task never consumes a slot.
    pub(crate) async fn acquire_slot(
        &self,
        cancel: &CancellationToken,
    ) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = cancel.cancelled() => None,
            permit = Arc::clone(&self.inner.semaphore).acquire_owned() => permit.ok(),
        }
    }

    #[cfg(test)]
    pub(crate) fn available_permits(&self) -> usize {
        self.inner.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn state_machine_walkthrough() {
        let manager = Manager::new();
        let task = manager.create_task(TaskType::Download);
        let id = task.id();

        assert_eq!(manager.get(&id).unwrap().status, TaskStatus::Pending);

        task.set_status(TaskStatus::Running);
        manager.pause(&id).unwrap();
        assert_eq!(manager.get(&id).unwrap().status, TaskStatus::Paused);

        manager.resume(&id).unwrap();
        assert_eq!(manager.get(&id).unwrap().status, TaskStatus::Pending);

        task.set_status(TaskStatus::Running);
        task.set_status(TaskStatus::Completed);
        assert_eq!(manager.get(&id).unwrap().status, TaskStatus::Completed);

        manager.remove(&id).unwrap();
        assert_eq!(manager.get(&id), Err(TaskError::TaskNotFound));
    }

    #[test]
    fn pause_requires_active_status() {
        let manager = Manager::new();
        let task = manager.create_task(TaskType::Upload);
        let id = task.id();

        task.set_status(TaskStatus::Completed);
        assert_eq!(manager.pause(&id), Err(TaskError::InvalidStatus));
        assert_eq!(manager.resume(&id), Err(TaskError::InvalidStatus));
    }

    #[test]
    fn cancel_is_terminal_and_not_repeatable() {
        let manager = Manager::new();
        let task = manager.create_task(TaskType::Download);
        let id = task.id();
        task.set_status(TaskStatus::Running);

        manager.cancel(&id).unwrap();
        assert_eq!(manager.get(&id).unwrap().status, TaskStatus::Canceled);

        // Sticky: a second cancel is an invalid transition.
        assert_eq!(manager.cancel(&id), Err(TaskError::InvalidStatus));

        manager.remove(&id).unwrap();
    }

    #[test]
    fn cancel_signals_registered_token() {
        let manager = Manager::new();
        let task = manager.create_task(TaskType::Upload);
        let id = task.id();
        let token = CancellationToken::new();
        manager.register_cancel(&id, token.clone());

        manager.cancel(&id).unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn remove_rejects_active_tasks() {
        let manager = Manager::new();
        let task = manager.create_task(TaskType::Upload);
        let id = task.id();

        assert_eq!(manager.remove(&id), Err(TaskError::InvalidStatus));
        task.set_status(TaskStatus::Running);
        assert_eq!(manager.remove(&id), Err(TaskError::InvalidStatus));
        task.set_status(TaskStatus::Failed);
        manager.remove(&id).unwrap();
    }

    #[test]
    fn unknown_ids_are_reported() {
        let manager = Manager::new();
        assert_eq!(manager.get("nope"), Err(TaskError::TaskNotFound));
        assert_eq!(manager.cancel("nope"), Err(TaskError::TaskNotFound));
        assert_eq!(manager.pause("nope"), Err(TaskError::TaskNotFound));
        assert_eq!(manager.resume("nope"), Err(TaskError::TaskNotFound));
        assert_eq!(manager.remove("nope"), Err(TaskError::TaskNotFound));
    }

    #[test]
    fn list_filters_by_status() {
        let manager = Manager::new();
        let a = manager.create_task(TaskType::Upload);
        let b = manager.create_task(TaskType::Download);
        b.set_status(TaskStatus::Running);

        assert_eq!(manager.list().len(), 2);
        let pending = manager.list_by_status(TaskStatus::Pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id());
    }

    #[test]
    fn subscribers_get_snapshots() {
        let manager = Manager::new();
        let seen: Arc<Mutex<Vec<TaskStatus>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.subscribe(Box::new(move |info| {
            sink.lock().unwrap().push(info.status);
        }));

        let task = manager.create_task(TaskType::Upload);
        task.set_status(TaskStatus::Running);
        manager.pause(&task.id()).unwrap();

        let statuses = seen.lock().unwrap().clone();
        assert_eq!(statuses, vec![TaskStatus::Paused]);
    }

    #[test]
    fn clones_share_state() {
        let manager = Manager::new();
        let clone = manager.clone();
        let task = manager.create_task(TaskType::Upload);
        assert!(clone.get(&task.id()).is_ok());
    }

    #[tokio::test]
    async fn canceled_task_never_takes_a_slot() {
        let manager = Manager::new();
        let token = CancellationToken::new();
        token.cancel();
        assert!(manager.acquire_slot(&token).await.is_none());
        // All permits still available.
        assert_eq!(manager.available_permits(), 3);
    }
}
