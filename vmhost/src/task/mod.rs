//! Progress tracking for long-running operations.
//!
//! Every asynchronous operation (instance creation, removal) registers a
//! [`Task`] here and advances it after each durable step. Observers poll
//! [`TaskTracker::get`] until the task reaches a terminal state.
//!
//! The registry is process-local: tasks are never deleted and never
//! persisted across restarts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::errors::{VmhostError, VmhostResult};

/// Opaque task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Running,
    Done,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }
}

/// Snapshot of a tracked operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub state: TaskState,
    pub message: String,
    /// 0-100. Never decreases while running; 100 once terminal.
    pub percent_complete: u8,
    /// Progress reached before a failure, kept for diagnostics.
    pub failed_at_percent: Option<u8>,
    /// Reference to what the operation produced (e.g. an instance id).
    pub outcome: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe task registry.
///
/// Cheap to clone; all clones share one registry. Construct one per
/// process and hand it to every component that reports progress.
#[derive(Clone, Default)]
pub struct TaskTracker {
    tasks: Arc<RwLock<HashMap<TaskId, Task>>>,
}

impl fmt::Debug for TaskTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskTracker")
            .field("tasks", &self.tasks.read().len())
            .finish()
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task in RUNNING state at 0%.
    pub fn create(&self, name: impl Into<String>) -> Task {
        let now = Utc::now();
        let task = Task {
            id: TaskId::generate(),
            name: name.into(),
            state: TaskState::Running,
            message: "created".to_string(),
            percent_complete: 0,
            failed_at_percent: None,
            outcome: None,
            created_at: now,
            updated_at: now,
        };

        tracing::debug!(task_id = %task.id, name = %task.name, "Task created");
        self.tasks.write().insert(task.id.clone(), task.clone());
        task
    }

    /// Advance a running task.
    ///
    /// Percent is clamped to 100 and never moves backwards.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the task is already DONE or FAILED.
    pub fn progress(
        &self,
        id: &TaskId,
        percent: u8,
        message: impl Into<String>,
    ) -> VmhostResult<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| VmhostError::NotFound(format!("task {}", id)))?;

        if task.state.is_terminal() {
            return Err(VmhostError::InvalidState(format!(
                "task {} is already {:?}",
                id, task.state
            )));
        }

        task.percent_complete = task.percent_complete.max(percent.min(100));
        task.message = message.into();
        task.updated_at = Utc::now();

        tracing::trace!(
            task_id = %id,
            percent = task.percent_complete,
            message = %task.message,
            "Task progress"
        );
        Ok(task.clone())
    }

    /// Mark a task DONE with an optional outcome reference.
    ///
    /// No-op if already DONE. A FAILED task cannot become DONE.
    pub fn done(
        &self,
        id: &TaskId,
        message: impl Into<String>,
        outcome: Option<String>,
    ) -> VmhostResult<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| VmhostError::NotFound(format!("task {}", id)))?;

        match task.state {
            TaskState::Done => return Ok(task.clone()),
            TaskState::Failed => {
                return Err(VmhostError::InvalidState(format!(
                    "task {} already failed",
                    id
                )));
            }
            TaskState::Running => {}
        }

        task.state = TaskState::Done;
        task.percent_complete = 100;
        task.message = message.into();
        task.outcome = outcome;
        task.updated_at = Utc::now();

        tracing::debug!(task_id = %id, outcome = ?task.outcome, "Task done");
        Ok(task.clone())
    }

    /// Mark a task FAILED.
    ///
    /// No-op if already terminal; DONE wins over a late failure.
    pub fn fail(&self, id: &TaskId, message: impl Into<String>) -> VmhostResult<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| VmhostError::NotFound(format!("task {}", id)))?;

        if task.state.is_terminal() {
            return Ok(task.clone());
        }

        task.state = TaskState::Failed;
        task.failed_at_percent = Some(task.percent_complete);
        task.percent_complete = 100;
        task.message = message.into();
        task.updated_at = Utc::now();

        tracing::warn!(task_id = %id, message = %task.message, "Task failed");
        Ok(task.clone())
    }

    pub fn get(&self, id: &TaskId) -> VmhostResult<Task> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| VmhostError::NotFound(format!("task {}", id)))
    }

    /// All tasks, newest first.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }
}
