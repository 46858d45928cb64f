//! Bounded task queue with markdown checkpoints.
//!
//! Tasks live in a single append-only JSONL log (`queue/tasks.jsonl`).
//! Adding a task appends one line; status mutations rewrite the whole file
//! atomically from the in-memory index, so the log always reflects the
//! latest committed state. Checkpoints let long work survive context
//! exhaustion: enough to resume, written as one markdown file per task.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::ids;
use crate::error::QueueError;
use crate::store::write_atomic;

/// Task log file name under the queue directory.
pub const TASKS_FILE: &str = "tasks.jsonl";
/// Checkpoint subdirectory name.
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for a worker.
    Queued,
    /// Claimed by the single active worker.
    Running,
    /// Finished successfully. Terminal.
    Done,
    /// Finished unsuccessfully. Terminal.
    Failed,
}

impl TaskStatus {
    /// Whether this status is terminal (sticky).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-task budget handed to the worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBudget {
    /// Tool calls the worker run may spend.
    pub max_tool_calls: usize,
    /// Steps the worker run may spend.
    pub max_steps: usize,
}

impl Default for TaskBudget {
    fn default() -> Self {
        Self {
            max_tool_calls: 24,
            max_steps: 12,
        }
    }
}

/// One unit of queued work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPacket {
    /// `task_NNNN` identifier, monotonic per queue.
    pub task_id: String,
    /// Parent task, for decomposed work.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// What to accomplish.
    pub objective: String,
    /// Input references (paths, chunk IDs, patch IDs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    /// Acceptance criteria.
    #[serde(default)]
    pub acceptance: String,
    /// Budget for the worker run.
    pub budget: TaskBudget,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata; `error` records the failure reason.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A resumable progress record, persisted as `checkpoints/<task_id>.md`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Task this checkpoint belongs to.
    pub task_id: String,
    /// Work completed so far.
    pub what_was_done: String,
    /// Paths or patch IDs touched.
    #[serde(default)]
    pub what_changed: Vec<String>,
    /// Next action on resume.
    pub what_next: String,
    /// Open blockers.
    #[serde(default)]
    pub blockers: Vec<String>,
    /// Chunk IDs grounding the work.
    #[serde(default)]
    pub citations: Vec<String>,
    /// When the checkpoint was taken.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Renders the checkpoint as markdown.
    #[must_use]
    pub fn to_markdown(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::new();
        let _ = writeln!(out, "# Checkpoint: {}\n", self.task_id);
        let _ = writeln!(out, "Created: {}\n", self.created_at.to_rfc3339());
        let _ = writeln!(out, "## What was done\n\n{}\n", self.what_was_done);
        let _ = writeln!(out, "## What changed\n");
        for item in &self.what_changed {
            let _ = writeln!(out, "- {item}");
        }
        let _ = writeln!(out, "\n## What next\n\n{}\n", self.what_next);
        let _ = writeln!(out, "## Blockers\n");
        for item in &self.blockers {
            let _ = writeln!(out, "- {item}");
        }
        let _ = writeln!(out, "\n## Citations\n");
        for item in &self.citations {
            let _ = writeln!(out, "- {item}");
        }
        out
    }
}

/// Fields accepted by [`TaskQueue::add_task`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    /// What to accomplish.
    pub objective: String,
    /// Input references.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Acceptance criteria.
    #[serde(default)]
    pub acceptance: String,
    /// Parent task ID.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Budget override.
    #[serde(default)]
    pub budget: Option<TaskBudget>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// The durable task queue.
#[derive(Debug)]
pub struct TaskQueue {
    queue_dir: PathBuf,
    tasks: Vec<TaskPacket>,
}

impl TaskQueue {
    /// Opens (or initializes) the queue under `queue_dir`, loading any
    /// existing task log.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the directory cannot be created or the
    /// log cannot be parsed.
    pub fn open(queue_dir: impl Into<PathBuf>) -> std::result::Result<Self, QueueError> {
        let queue_dir = queue_dir.into();
        let checkpoints = queue_dir.join(CHECKPOINTS_DIR);
        std::fs::create_dir_all(&checkpoints).map_err(|e| QueueError::Io {
            path: checkpoints.display().to_string(),
            reason: e.to_string(),
        })?;

        let tasks_path = queue_dir.join(TASKS_FILE);
        let mut tasks = Vec::new();
        if tasks_path.is_file() {
            let raw = std::fs::read_to_string(&tasks_path).map_err(|e| QueueError::Io {
                path: tasks_path.display().to_string(),
                reason: e.to_string(),
            })?;
            for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                tasks.push(serde_json::from_str::<TaskPacket>(line)?);
            }
        }
        Ok(Self { queue_dir, tasks })
    }

    /// All tasks in insertion order.
    #[must_use]
    pub fn list(&self) -> &[TaskPacket] {
        &self.tasks
    }

    /// Looks up a task by ID.
    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<&TaskPacket> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// Adds a task with the next monotonic ordinal, status `queued`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when the log append fails.
    pub fn add_task(&mut self, new: NewTask) -> std::result::Result<TaskPacket, QueueError> {
        let ordinal = self
            .tasks
            .iter()
            .filter_map(|t| t.task_id.strip_prefix("task_")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let now = Utc::now();
        let task = TaskPacket {
            task_id: ids::task_id(ordinal),
            parent_id: new.parent_id,
            objective: new.objective,
            inputs: new.inputs,
            acceptance: new.acceptance,
            budget: new.budget.unwrap_or_default(),
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            metadata: new.metadata,
        };
        self.append_line(&task)?;
        self.tasks.push(task.clone());
        Ok(task)
    }

    /// Claims the earliest `queued` task, transitioning it to `running`
    /// and persisting the change before returning. `None` when the queue
    /// has no queued work.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] when persistence fails.
    pub fn get_next(&mut self) -> std::result::Result<Option<TaskPacket>, QueueError> {
        let Some(idx) = self
            .tasks
            .iter()
            .position(|t| t.status == TaskStatus::Queued)
        else {
            return Ok(None);
        };
        self.tasks[idx].status = TaskStatus::Running;
        self.tasks[idx].updated_at = Utc::now();
        self.rewrite()?;
        Ok(Some(self.tasks[idx].clone()))
    }

    /// Transitions a task to `done`, writing the checkpoint if provided.
    ///
    /// # Errors
    ///
    /// [`QueueError::TaskNotFound`] for unknown IDs,
    /// [`QueueError::InvalidTransition`] out of a terminal status.
    pub fn mark_done(
        &mut self,
        task_id: &str,
        checkpoint: Option<&Checkpoint>,
    ) -> std::result::Result<TaskPacket, QueueError> {
        let task = self.transition(task_id, TaskStatus::Done)?;
        if let Some(checkpoint) = checkpoint {
            self.save_checkpoint(checkpoint)?;
        }
        Ok(task)
    }

    /// Transitions a task to `failed`, recording the error in
    /// `metadata.error` and writing the checkpoint if provided.
    ///
    /// # Errors
    ///
    /// Same as [`TaskQueue::mark_done`].
    pub fn mark_failed(
        &mut self,
        task_id: &str,
        error: &str,
        checkpoint: Option<&Checkpoint>,
    ) -> std::result::Result<TaskPacket, QueueError> {
        let idx = self.index_of(task_id)?;
        if self.tasks[idx].status.is_terminal() {
            return Err(QueueError::InvalidTransition {
                id: task_id.to_string(),
                from: self.tasks[idx].status.to_string(),
                to: TaskStatus::Failed.to_string(),
            });
        }
        self.tasks[idx]
            .metadata
            .insert("error".to_string(), serde_json::Value::String(error.to_string()));
        let task = self.transition(task_id, TaskStatus::Failed)?;
        if let Some(checkpoint) = checkpoint {
            self.save_checkpoint(checkpoint)?;
        }
        Ok(task)
    }

    /// Writes a checkpoint markdown file atomically.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] on I/O failure.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> std::result::Result<(), QueueError> {
        let path = self
            .queue_dir
            .join(CHECKPOINTS_DIR)
            .join(format!("{}.md", checkpoint.task_id));
        write_atomic(&path, checkpoint.to_markdown().as_bytes()).map_err(|e| QueueError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Path of a task's checkpoint file.
    #[must_use]
    pub fn checkpoint_path(&self, task_id: &str) -> PathBuf {
        self.queue_dir
            .join(CHECKPOINTS_DIR)
            .join(format!("{task_id}.md"))
    }

    fn transition(
        &mut self,
        task_id: &str,
        to: TaskStatus,
    ) -> std::result::Result<TaskPacket, QueueError> {
        let idx = self.index_of(task_id)?;
        let from = self.tasks[idx].status;
        if from.is_terminal() {
            return Err(QueueError::InvalidTransition {
                id: task_id.to_string(),
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        self.tasks[idx].status = to;
        self.tasks[idx].updated_at = Utc::now();
        self.rewrite()?;
        Ok(self.tasks[idx].clone())
    }

    fn index_of(&self, task_id: &str) -> std::result::Result<usize, QueueError> {
        self.tasks
            .iter()
            .position(|t| t.task_id == task_id)
            .ok_or_else(|| QueueError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    fn append_line(&self, task: &TaskPacket) -> std::result::Result<(), QueueError> {
        let path = self.queue_dir.join(TASKS_FILE);
        let mut line = serde_json::to_string(task)?;
        line.push('\n');
        let mut file = std::fs::File::options()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| QueueError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        file.write_all(line.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| QueueError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    fn rewrite(&self) -> std::result::Result<(), QueueError> {
        let path = self.queue_dir.join(TASKS_FILE);
        let mut out = String::new();
        for task in &self.tasks {
            out.push_str(&serde_json::to_string(task)?);
            out.push('\n');
        }
        write_atomic(&path, out.as_bytes()).map_err(|e| QueueError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}
