//! Per-run execution state.
//!
//! An [`ExecutionContext`] lives for exactly one run. It owns the step
//! history and the two budgets: steps per run and tool calls per step.
//! The per-step tool counter resets to zero whenever a step is appended.

use serde::{Deserialize, Serialize};

use super::message::Conversation;
use super::step::Step;

/// Default maximum steps per run.
pub const DEFAULT_MAX_STEPS: usize = 20;

/// Default maximum tool calls within a single step.
pub const DEFAULT_MAX_TOOLS_PER_STEP: usize = 8;

/// Mutable per-run execution state.
///
/// Invariants: `current_step <= max_steps`;
/// `tools_used_this_step <= max_tools_per_step`; the tool counter is zero
/// immediately after every [`ExecutionContext::add_step`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Opaque run identifier (`run_` prefix).
    pub run_id: String,
    /// Conversation this run extends.
    pub conversation_id: String,
    /// Names of tools available to this run.
    pub available_tools: Vec<String>,
    /// Steps consumed so far.
    pub current_step: usize,
    /// Step budget for the run.
    pub max_steps: usize,
    /// Append-only step history.
    pub steps: Vec<Step>,
    /// Tool-call budget within one step.
    pub max_tools_per_step: usize,
    /// Tool calls consumed in the current step.
    pub tools_used_this_step: usize,
}

impl ExecutionContext {
    /// Creates a fresh context for one run.
    #[must_use]
    pub fn new(conversation_id: impl Into<String>, available_tools: Vec<String>) -> Self {
        Self {
            run_id: super::ids::run_id(),
            conversation_id: conversation_id.into(),
            available_tools,
            current_step: 0,
            max_steps: DEFAULT_MAX_STEPS,
            steps: Vec::new(),
            max_tools_per_step: DEFAULT_MAX_TOOLS_PER_STEP,
            tools_used_this_step: 0,
        }
    }

    /// Overrides the step budget.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Overrides the per-step tool budget.
    #[must_use]
    pub const fn with_max_tools_per_step(mut self, max_tools: usize) -> Self {
        self.max_tools_per_step = max_tools;
        self
    }

    /// Appends a step and resets the per-step tool counter.
    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
        self.tools_used_this_step = 0;
    }

    /// Whether the run has step budget remaining.
    #[must_use]
    pub const fn has_steps_remaining(&self) -> bool {
        self.current_step < self.max_steps
    }

    /// Whether another tool call fits in the current step's budget.
    #[must_use]
    pub const fn has_tool_budget(&self) -> bool {
        self.tools_used_this_step < self.max_tools_per_step
    }

    /// Consumes one unit of the per-step tool budget.
    pub const fn consume_tool_budget(&mut self) {
        self.tools_used_this_step += 1;
    }

    /// Consumes one step of the run budget.
    pub const fn consume_step(&mut self) {
        self.current_step += 1;
    }
}

/// Everything a single run owns: its conversation and execution state.
///
/// Shared with no other run; the shared stores are referenced through the
/// engine, never owned here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// The conversation, which outlives the run.
    pub conversation: Conversation,
    /// The per-run execution context.
    pub execution: ExecutionContext,
}

impl AgentState {
    /// Creates run state over a fresh conversation.
    #[must_use]
    pub fn new(available_tools: Vec<String>) -> Self {
        let conversation = Conversation::new();
        let execution = ExecutionContext::new(conversation.id.clone(), available_tools);
        Self {
            conversation,
            execution,
        }
    }
}

/// Outcome of one loop run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopResult {
    /// Whether the run reached a final answer (including the bounded
    /// step-limit answer).
    pub success: bool,
    /// Final answer text.
    pub final_answer: String,
    /// Fatal error description, when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Steps consumed by the run.
    pub steps_used: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::{Step, StepType};

    #[test]
    fn test_new_context_defaults() {
        let ctx = ExecutionContext::new("conv_x", vec!["read_file".to_string()]);
        assert!(ctx.run_id.starts_with("run_"));
        assert_eq!(ctx.current_step, 0);
        assert_eq!(ctx.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(ctx.tools_used_this_step, 0);
        assert!(ctx.has_steps_remaining());
        assert!(ctx.has_tool_budget());
    }

    #[test]
    fn test_add_step_resets_tool_counter() {
        let mut ctx = ExecutionContext::new("conv_x", vec![]);
        ctx.consume_tool_budget();
        ctx.consume_tool_budget();
        assert_eq!(ctx.tools_used_this_step, 2);

        ctx.add_step(Step::new(StepType::Observe, ""));
        assert_eq!(ctx.tools_used_this_step, 0);
    }

    #[test]
    fn test_tool_budget_exhaustion() {
        let mut ctx = ExecutionContext::new("conv_x", vec![]).with_max_tools_per_step(2);
        assert!(ctx.has_tool_budget());
        ctx.consume_tool_budget();
        assert!(ctx.has_tool_budget());
        ctx.consume_tool_budget();
        assert!(!ctx.has_tool_budget());
    }

    #[test]
    fn test_step_budget() {
        let mut ctx = ExecutionContext::new("conv_x", vec![]).with_max_steps(1);
        assert!(ctx.has_steps_remaining());
        ctx.consume_step();
        assert!(!ctx.has_steps_remaining());
    }

    #[test]
    fn test_agent_state_links_conversation() {
        let state = AgentState::new(vec!["shell".to_string()]);
        assert_eq!(state.execution.conversation_id, state.conversation.id);
        assert_eq!(state.execution.available_tools, vec!["shell".to_string()]);
    }
}
