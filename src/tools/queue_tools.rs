//! Task queue tools: `queue_add`, `queue_next`, `queue_done`, `queue_fail`.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use super::{Tool, ToolOutcome, parse_args, schema};
use crate::error::ToolError;
use crate::queue::{Checkpoint, NewTask, TaskPacket, TaskQueue};

#[derive(Debug, Deserialize)]
struct AddParams {
    objective: String,
    #[serde(default)]
    inputs: Vec<String>,
    #[serde(default)]
    acceptance: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CheckpointParams {
    #[serde(default)]
    what_was_done: String,
    #[serde(default)]
    what_changed: Vec<String>,
    #[serde(default)]
    what_next: String,
    #[serde(default)]
    blockers: Vec<String>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DoneParams {
    task_id: String,
    #[serde(default)]
    checkpoint: Option<CheckpointParams>,
}

#[derive(Debug, Deserialize)]
struct FailParams {
    task_id: String,
    error: String,
    #[serde(default)]
    checkpoint: Option<CheckpointParams>,
}

fn checkpoint_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "description": "Resumable progress record",
        "properties": {
            "what_was_done": {"type": "string"},
            "what_changed": {"type": "array", "items": {"type": "string"}},
            "what_next": {"type": "string"},
            "blockers": {"type": "array", "items": {"type": "string"}},
            "citations": {"type": "array", "items": {"type": "string"}},
        },
        "additionalProperties": false,
    })
}

fn build_checkpoint(task_id: &str, params: CheckpointParams) -> Checkpoint {
    Checkpoint {
        task_id: task_id.to_string(),
        what_was_done: params.what_was_done,
        what_changed: params.what_changed,
        what_next: params.what_next,
        blockers: params.blockers,
        citations: params.citations,
        created_at: Utc::now(),
    }
}

fn lock(queue: &Mutex<TaskQueue>) -> std::result::Result<MutexGuard<'_, TaskQueue>, ToolError> {
    queue
        .lock()
        .map_err(|_| ToolError::runtime("QUEUE_IO", "queue lock poisoned"))
}

fn describe(task: &TaskPacket) -> String {
    format!("{} [{}] {}", task.task_id, task.status, task.objective)
}

/// Enqueues a new task.
pub struct QueueAddTool {
    queue: Arc<Mutex<TaskQueue>>,
}

impl QueueAddTool {
    /// Creates the tool over the shared queue.
    #[must_use]
    pub fn new(queue: Arc<Mutex<TaskQueue>>) -> Self {
        Self { queue }
    }
}

impl Tool for QueueAddTool {
    fn name(&self) -> &'static str {
        "queue_add"
    }

    fn description(&self) -> &'static str {
        "Add a task to the queue; returns the assigned task id"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[
                ("objective", schema::string("What the task should accomplish")),
                ("inputs", schema::string_array("Input references (paths, chunk ids, patch ids)")),
                ("acceptance", schema::string("Acceptance criteria")),
                ("parent_id", schema::string("Parent task id, for decomposed work")),
            ],
            &["objective"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: AddParams = parse_args(arguments)?;
        let task = lock(&self.queue)?.add_task(NewTask {
            objective: params.objective,
            inputs: params.inputs,
            acceptance: params.acceptance.unwrap_or_default(),
            parent_id: params.parent_id,
            budget: None,
            metadata: std::collections::BTreeMap::new(),
        })?;
        Ok(describe(&task))
    }
}

/// Claims the next queued task.
pub struct QueueNextTool {
    queue: Arc<Mutex<TaskQueue>>,
}

impl QueueNextTool {
    /// Creates the tool over the shared queue.
    #[must_use]
    pub fn new(queue: Arc<Mutex<TaskQueue>>) -> Self {
        Self { queue }
    }
}

impl Tool for QueueNextTool {
    fn name(&self) -> &'static str {
        "queue_next"
    }

    fn description(&self) -> &'static str {
        "Claim the earliest queued task (transitions it to running)"
    }

    fn parameters(&self) -> Value {
        schema::object(&[], &[])
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let _: serde_json::Map<String, Value> = parse_args(arguments)?;
        match lock(&self.queue)?.get_next()? {
            Some(task) => Ok(format!(
                "{}\ninputs: {}\nacceptance: {}",
                describe(&task),
                task.inputs.join(", "),
                task.acceptance
            )),
            None => Ok("queue is empty".to_string()),
        }
    }
}

/// Marks a task done, optionally writing a checkpoint.
pub struct QueueDoneTool {
    queue: Arc<Mutex<TaskQueue>>,
}

impl QueueDoneTool {
    /// Creates the tool over the shared queue.
    #[must_use]
    pub fn new(queue: Arc<Mutex<TaskQueue>>) -> Self {
        Self { queue }
    }
}

impl Tool for QueueDoneTool {
    fn name(&self) -> &'static str {
        "queue_done"
    }

    fn description(&self) -> &'static str {
        "Mark a task done; write its checkpoint so follow-up work can resume"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[
                ("task_id", schema::string("Task to complete")),
                ("checkpoint", checkpoint_schema()),
            ],
            &["task_id"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: DoneParams = parse_args(arguments)?;
        let checkpoint = params
            .checkpoint
            .map(|c| build_checkpoint(&params.task_id, c));
        let task = lock(&self.queue)?.mark_done(&params.task_id, checkpoint.as_ref())?;
        Ok(describe(&task))
    }
}

/// Marks a task failed with an error record.
pub struct QueueFailTool {
    queue: Arc<Mutex<TaskQueue>>,
}

impl QueueFailTool {
    /// Creates the tool over the shared queue.
    #[must_use]
    pub fn new(queue: Arc<Mutex<TaskQueue>>) -> Self {
        Self { queue }
    }
}

impl Tool for QueueFailTool {
    fn name(&self) -> &'static str {
        "queue_fail"
    }

    fn description(&self) -> &'static str {
        "Mark a task failed, recording the error; optionally write a checkpoint"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[
                ("task_id", schema::string("Task to fail")),
                ("error", schema::string("What went wrong")),
                ("checkpoint", checkpoint_schema()),
            ],
            &["task_id", "error"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: FailParams = parse_args(arguments)?;
        let checkpoint = params
            .checkpoint
            .map(|c| build_checkpoint(&params.task_id, c));
        let task =
            lock(&self.queue)?.mark_failed(&params.task_id, &params.error, checkpoint.as_ref())?;
        Ok(describe(&task))
    }
}
