//! Task and progress registry.
//!
//! The registry is how long-running background work announces itself and
//! how single-flight is enforced: a task id can only be registered once at a
//! time. [`TaskManager`] is the in-process implementation; the embedder only
//! depends on the [`TaskRegistry`] trait.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Lifecycle state of the hosting daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    #[default]
    Starting,
    Migrating,
    Active,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Migrating => "migrating",
            Self::Active => "active",
        })
    }
}

/// What a registered task is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Embedding,
    LoadingModel,
}

/// A registered task and its progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub id: String,
    pub kind: TaskKind,
    pub description: String,
    pub total: i64,
    pub completed: i64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task '{0}' already exists")]
    AlreadyExists(String),

    #[error("Task '{0}' not found")]
    NotFound(String),
}

/// Registry capability consumed by the embedder.
pub trait TaskRegistry: Send + Sync {
    /// Register a task. Fails with [`TaskError::AlreadyExists`] if the id is taken.
    fn add_task(
        &self,
        id: &str,
        kind: TaskKind,
        description: &str,
        total: i64,
    ) -> Result<Task, TaskError>;

    /// Replace the progress counters of a task.
    fn update_progress(&self, id: &str, total: i64, completed: i64) -> Result<Task, TaskError>;

    /// Remove a task. Fails with [`TaskError::NotFound`] if absent.
    fn delete_task(&self, id: &str) -> Result<Task, TaskError>;

    /// Current daemon state.
    fn global_state(&self) -> DaemonState;
}

/// In-memory task registry.
#[derive(Debug, Default)]
pub struct TaskManager {
    inner: Mutex<Registry>,
}

#[derive(Debug, Default)]
struct Registry {
    state: DaemonState,
    tasks: BTreeMap<String, Task>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_global_state(&self, state: DaemonState) {
        self.inner.lock().state = state;
    }

    /// Snapshot of the registered tasks, ordered by id.
    pub fn tasks(&self) -> Vec<Task> {
        self.inner.lock().tasks.values().cloned().collect()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.inner.lock().tasks.get(id).cloned()
    }
}

impl TaskRegistry for TaskManager {
    fn add_task(
        &self,
        id: &str,
        kind: TaskKind,
        description: &str,
        total: i64,
    ) -> Result<Task, TaskError> {
        let mut inner = self.inner.lock();
        if inner.tasks.contains_key(id) {
            return Err(TaskError::AlreadyExists(id.to_string()));
        }
        let task = Task {
            id: id.to_string(),
            kind,
            description: description.to_string(),
            total,
            completed: 0,
        };
        inner.tasks.insert(id.to_string(), task.clone());
        Ok(task)
    }

    fn update_progress(&self, id: &str, total: i64, completed: i64) -> Result<Task, TaskError> {
        let mut inner = self.inner.lock();
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        task.total = total;
        task.completed = completed;
        Ok(task.clone())
    }

    fn delete_task(&self, id: &str) -> Result<Task, TaskError> {
        self.inner
            .lock()
            .tasks
            .remove(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    fn global_state(&self) -> DaemonState {
        self.inner.lock().state
    }
}
