use std::fmt;
use std::sync::RwLock;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Task direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Upload,
    Download,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::Upload => f.write_str("upload"),
            TaskType::Download => f.write_str("download"),
        }
    }
}

/// Task lifecycle status. `Completed`, `Failed` and `Canceled` are
/// terminal and sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// A live transfer task. All access goes through the lock; callers
/// outside the engine only ever see [`TaskInfo`] snapshots.
pub struct Task {
    inner: RwLock<TaskInner>,
}

struct TaskInner {
    id: String,
    task_type: TaskType,
    status: TaskStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    progress: i64,
    total: i64,
    speed: i64,
    file_id: String,
    file_name: String,
    local_path: String,
    parent_id: String,
    error: Option<String>,
    last_progress: i64,
    last_time: Instant,
}

impl Task {
    pub fn new(id: &str, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            inner: RwLock::new(TaskInner {
                id: id.to_string(),
                task_type,
                status: TaskStatus::Pending,
                created_at: now,
                updated_at: now,
                progress: 0,
                total: 0,
                speed: 0,
                file_id: String::new(),
                file_name: String::new(),
                local_path: String::new(),
                parent_id: String::new(),
                error: None,
                last_progress: 0,
                last_time: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> String {
        self.inner.read().unwrap().id.clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.inner.read().unwrap().status
    }

    pub fn set_status(&self, status: TaskStatus) {
        let mut inner = self.inner.write().unwrap();
        inner.status = status;
        inner.updated_at = Utc::now();
    }

    /// Updates progress and derives speed from the delta since the
    /// previous write.
    pub fn set_progress(&self, progress: i64) {
        let mut inner = self.inner.write().unwrap();
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_time).as_secs_f64();
        if elapsed > 0.0 {
            inner.speed = ((progress - inner.last_progress) as f64 / elapsed) as i64;
        }
        inner.progress = progress;
        inner.last_progress = progress;
        inner.last_time = now;
        inner.updated_at = Utc::now();
    }

    pub fn set_total(&self, total: i64) {
        let mut inner = self.inner.write().unwrap();
        inner.total = total;
        inner.updated_at = Utc::now();
    }

    pub fn set_file_id(&self, file_id: &str) {
        self.inner.write().unwrap().file_id = file_id.to_string();
    }

    pub fn set_file_name(&self, file_name: &str) {
        self.inner.write().unwrap().file_name = file_name.to_string();
    }

    pub fn set_local_path(&self, local_path: &str) {
        self.inner.write().unwrap().local_path = local_path.to_string();
    }

    pub fn set_parent_id(&self, parent_id: &str) {
        self.inner.write().unwrap().parent_id = parent_id.to_string();
    }

    pub fn local_path(&self) -> String {
        self.inner.read().unwrap().local_path.clone()
    }

    pub fn file_name(&self) -> String {
        self.inner.read().unwrap().file_name.clone()
    }

    pub fn parent_id(&self) -> String {
        self.inner.read().unwrap().parent_id.clone()
    }

    /// Marks the task failed with an error message.
    pub fn set_error(&self, message: &str) {
        let mut inner = self.inner.write().unwrap();
        inner.error = Some(message.to_string());
        inner.status = TaskStatus::Failed;
        inner.updated_at = Utc::now();
    }

    /// Value snapshot handed to callers and progress callbacks.
    pub fn snapshot(&self) -> TaskInfo {
        let inner = self.inner.read().unwrap();
        TaskInfo {
            id: inner.id.clone(),
            task_type: inner.task_type,
            status: inner.status,
            created_at: inner.created_at,
            updated_at: inner.updated_at,
            progress: inner.progress,
            total: inner.total,
            speed: inner.speed,
            file_id: inner.file_id.clone(),
            file_name: inner.file_name.clone(),
            local_path: inner.local_path.clone(),
            parent_id: inner.parent_id.clone(),
            error: inner.error.clone(),
        }
    }
}

/// Point-in-time copy of a task's externally visible state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskInfo {
    pub id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub progress: i64,
    pub total: i64,
    pub speed: i64,
    pub file_id: String,
    pub file_name: String,
    pub local_path: String,
    pub parent_id: String,
    pub error: Option<String>,
}

impl TaskInfo {
    /// Completion percentage in `[0, 100]`.
    pub fn percent(&self) -> f64 {
        if self.total <= 0 {
            return 0.0;
        }
        self.progress as f64 / self.total as f64 * 100.0
    }
}
