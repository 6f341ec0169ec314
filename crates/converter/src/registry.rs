//! Task registry
//!
//! Tracks every submitted conversion from creation to its single terminal
//! outcome. The id map is only locked long enough to insert, look up or
//! remove an entry; each entry has its own lock, so completing one task never
//! blocks readers of another.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Opaque, collision-free task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(TaskId)
    }
}

/// Error type for registry lookups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("task not found")]
    NotFound(TaskId),
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Succeeded { output: PathBuf },
    Failed { message: String },
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Running => "running",
            TaskState::Succeeded { .. } => "succeeded",
            TaskState::Failed { .. } => "failed",
        }
    }
}

/// Terminal outcome reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success { output: PathBuf },
    Failure { message: String },
}

/// Metadata recorded when a task is created.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub original_filename: String,
    pub output_filename: String,
    /// Staged upload; deleted on success, otherwise kept until eviction.
    pub upload_path: PathBuf,
}

/// Point-in-time copy of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub original_filename: String,
    pub output_filename: String,
    #[serde(flatten)]
    pub state: TaskState,
    pub created_at_ms: u64,
    pub finished_at_ms: Option<u64>,
}

/// Task counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// A task removed by [`TaskRegistry::evict_expired`].
#[derive(Debug, Clone)]
pub struct EvictedTask {
    pub id: TaskId,
    pub state: TaskState,
    pub upload_path: PathBuf,
}

#[derive(Debug)]
struct TaskEntry {
    id: TaskId,
    meta: NewTask,
    state: TaskState,
    created_at_ms: u64,
    finished_at_ms: Option<u64>,
    finished_at: Option<Instant>,
}

impl TaskEntry {
    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            original_filename: self.meta.original_filename.clone(),
            output_filename: self.meta.output_filename.clone(),
            state: self.state.clone(),
            created_at_ms: self.created_at_ms,
            finished_at_ms: self.finished_at_ms,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Concurrent map from task id to task state.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Arc<Mutex<TaskEntry>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new running task and returns its fresh id.
    pub fn create(&self, meta: NewTask) -> TaskId {
        let mut tasks = self.tasks.write();
        loop {
            let id = TaskId::generate();
            if let Entry::Vacant(slot) = tasks.entry(id) {
                slot.insert(Arc::new(Mutex::new(TaskEntry {
                    id,
                    meta,
                    state: TaskState::Running,
                    created_at_ms: unix_millis(),
                    finished_at_ms: None,
                    finished_at: None,
                })));
                return id;
            }
        }
    }

    fn entry(&self, id: &TaskId) -> Result<Arc<Mutex<TaskEntry>>, RegistryError> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or(RegistryError::NotFound(*id))
    }

    /// Records the terminal outcome of a task.
    ///
    /// # Returns
    /// * `Ok(true)` - the task moved from running to the outcome
    /// * `Ok(false)` - the task was already terminal; the outcome is ignored
    /// * `Err(RegistryError::NotFound)` - unknown id
    pub fn complete(&self, id: &TaskId, outcome: TaskOutcome) -> Result<bool, RegistryError> {
        let entry = self.entry(id)?;
        let mut entry = entry.lock();
        if entry.state.is_terminal() {
            warn!(
                task_id = %id,
                state = entry.state.as_str(),
                "ignoring second completion of task"
            );
            return Ok(false);
        }

        entry.state = match outcome {
            TaskOutcome::Success { output } => TaskState::Succeeded { output },
            TaskOutcome::Failure { message } => TaskState::Failed { message },
        };
        entry.finished_at_ms = Some(unix_millis());
        entry.finished_at = Some(Instant::now());
        Ok(true)
    }

    /// Returns a snapshot of the task.
    pub fn get(&self, id: &TaskId) -> Result<TaskSnapshot, RegistryError> {
        Ok(self.entry(id)?.lock().snapshot())
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let entries: Vec<_> = self.tasks.read().values().cloned().collect();
        let mut stats = RegistryStats::default();
        for entry in entries {
            match entry.lock().state {
                TaskState::Running => stats.running += 1,
                TaskState::Succeeded { .. } => stats.succeeded += 1,
                TaskState::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }

    /// Removes terminal tasks that finished at least `ttl` ago.
    ///
    /// Running tasks are never evicted.
    pub fn evict_expired(&self, ttl: Duration) -> Vec<EvictedTask> {
        let mut tasks = self.tasks.write();
        let expired: Vec<TaskId> = tasks
            .iter()
            .filter(|(_, entry)| {
                entry
                    .lock()
                    .finished_at
                    .map(|at| at.elapsed() >= ttl)
                    .unwrap_or(false)
            })
            .map(|(id, _)| *id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| tasks.remove(&id))
            .map(|entry| {
                let entry = entry.lock();
                EvictedTask {
                    id: entry.id,
                    state: entry.state.clone(),
                    upload_path: entry.meta.upload_path.clone(),
                }
            })
            .collect()
    }
}
