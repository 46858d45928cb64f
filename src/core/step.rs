//! Run step history.
//!
//! A step is one unit in a run's history: a model thought, a tool-call
//! batch, an observation, a final answer, or an error. Steps are
//! append-only; the judge reads them post-hoc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::{ToolCall, ToolResult};

/// Kind of a run step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    /// Model reasoning text without tool use.
    Think,
    /// Model requested one or more tool calls.
    CallTool,
    /// Tool results observed by the loop.
    Observe,
    /// Final answer; terminates the run.
    Respond,
    /// Loop-level failure recorded in the history.
    Error,
}

/// One entry in a run's append-only step history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Kind of step.
    pub step_type: StepType,
    /// Text content (thought, answer, or error description).
    pub content: String,
    /// Tool calls issued in this step (for `CallTool`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Tool results observed in this step (for `Observe`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    /// When the step was appended.
    pub timestamp: DateTime<Utc>,
}

impl Step {
    /// Creates a step with the given type and content, stamped now.
    #[must_use]
    pub fn new(step_type: StepType, content: impl Into<String>) -> Self {
        Self {
            step_type,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Creates a `CallTool` step carrying the requested calls.
    #[must_use]
    pub fn call_tool(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut step = Self::new(StepType::CallTool, content);
        step.tool_calls = tool_calls;
        step
    }

    /// Creates an `Observe` step carrying tool results.
    #[must_use]
    pub fn observe(tool_results: Vec<ToolResult>) -> Self {
        let mut step = Self::new(StepType::Observe, "");
        step.tool_results = tool_results;
        step
    }

    /// Creates a `Respond` step with the final answer.
    #[must_use]
    pub fn respond(answer: impl Into<String>) -> Self {
        Self::new(StepType::Respond, answer)
    }

    /// Creates an `Error` step.
    #[must_use]
    pub fn error(description: impl Into<String>) -> Self {
        Self::new(StepType::Error, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_constructors() {
        let step = Step::respond("done");
        assert_eq!(step.step_type, StepType::Respond);
        assert_eq!(step.content, "done");
        assert!(step.tool_calls.is_empty());
        assert!(step.tool_results.is_empty());

        let call = ToolCall::new("shell", serde_json::json!({"command": "ls"}));
        let step = Step::call_tool("", vec![call]);
        assert_eq!(step.step_type, StepType::CallTool);
        assert_eq!(step.tool_calls.len(), 1);

        let result = ToolResult::success("call_1", "ok");
        let step = Step::observe(vec![result]);
        assert_eq!(step.step_type, StepType::Observe);
        assert_eq!(step.tool_results.len(), 1);
    }

    #[test]
    fn test_step_type_serialization() {
        let json = serde_json::to_string(&StepType::CallTool).unwrap();
        assert_eq!(json, "\"CALL_TOOL\"");
        let json = serde_json::to_string(&StepType::Think).unwrap();
        assert_eq!(json, "\"THINK\"");
    }
}
