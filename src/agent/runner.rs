//! The step-bounded reasoning loop.
//!
//! One run: compose the system prompt, then alternate model completions
//! with validated tool dispatch until a final answer, the step limit, or a
//! fatal gateway failure. Tool calls within a step run sequentially in
//! declared order; the per-step tool budget short-circuits the overflow
//! with `BUDGET_EXCEEDED` and resets on the next step.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::engine::Engine;
use super::gateway::{Completion, ModelGateway};
use super::prompt;
use crate::core::{
    AgentState, LoopResult, Message, Step, StepType, ToolCall, ToolResult,
    context::{DEFAULT_MAX_STEPS, DEFAULT_MAX_TOOLS_PER_STEP},
};
use crate::error::{GatewayError, ToolError};
use crate::judge::{Judgment, Severity};
use crate::trace::TraceLogger;

/// Gateway attempts before the run aborts.
const GATEWAY_ATTEMPTS: usize = 3;

/// The loop orchestrator for one engine and gateway pairing.
pub struct AgentLoop {
    engine: Arc<Engine>,
    gateway: Arc<dyn ModelGateway>,
    max_steps: usize,
    max_tools_per_step: usize,
    cancelled: Arc<AtomicBool>,
}

impl AgentLoop {
    /// Creates a loop with default budgets.
    #[must_use]
    pub fn new(engine: Arc<Engine>, gateway: Arc<dyn ModelGateway>) -> Self {
        Self {
            engine,
            gateway,
            max_steps: DEFAULT_MAX_STEPS,
            max_tools_per_step: DEFAULT_MAX_TOOLS_PER_STEP,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Overrides the per-run step budget.
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

    /// Handle for user-level cancellation, observed at the next suspension
    /// point (between tool calls and before each model call).
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Runs the loop for one user message and returns the outcome together
    /// with the final run state.
    #[must_use]
    pub fn run(&self, user_message: &str) -> (LoopResult, AgentState) {
        let registry = self.engine.registry();
        let mut state = AgentState::new(registry.names());
        state.execution.max_steps = self.max_steps;
        state.execution.max_tools_per_step = self.max_tools_per_step;

        let trace = TraceLogger::new(state.execution.run_id.clone());
        let system = prompt::compose(
            &registry.specs(),
            self.engine.sandbox().workspace_root(),
            self.engine.sandbox().project_root(),
        );
        state.conversation.push(Message::system(system));
        state.conversation.push(Message::user(user_message));

        let specs = registry.specs();
        while state.execution.has_steps_remaining() {
            if self.cancelled.load(Ordering::Relaxed) {
                return self.abort(&trace, state, "run cancelled");
            }

            let completion = match self.complete_with_retry(&state, &specs) {
                Ok(completion) => completion,
                Err(err) => {
                    let message = format!("gateway failed after retries: {err}");
                    state.execution.add_step(Step::error(&message));
                    return self.abort(&trace, state, &message);
                }
            };
            state.execution.consume_step();

            if completion.is_final() {
                let answer = completion.content.unwrap_or_default();
                state
                    .conversation
                    .push(Message::assistant(&answer, Vec::new()));
                state.execution.add_step(Step::respond(&answer));
                trace.run_end(true, &format!("final answer, {} chars", answer.len()));
                let result = LoopResult {
                    success: true,
                    final_answer: answer,
                    error: None,
                    steps_used: state.execution.current_step,
                };
                return (result, state);
            }

            let assistant_text = completion.content.clone().unwrap_or_default();
            state.conversation.push(Message::assistant(
                &assistant_text,
                completion.tool_calls.clone(),
            ));
            state.execution.add_step(Step::call_tool(
                &assistant_text,
                completion.tool_calls.clone(),
            ));

            let mut results = Vec::with_capacity(completion.tool_calls.len());
            let mut blocking_notes = Vec::new();
            for call in &completion.tool_calls {
                if self.cancelled.load(Ordering::Relaxed) {
                    break;
                }
                let (result, note) = self.dispatch_one(&mut state, &trace, call);
                if let Some(note) = note {
                    blocking_notes.push(note);
                }
                results.push(result);
            }

            for result in &results {
                state.conversation.push(Message::tool(result));
            }
            state.execution.add_step(Step::observe(results));

            for judgment in self
                .engine
                .judge()
                .review(&state.execution, &assistant_text)
                .into_iter()
                .chain(blocking_notes)
            {
                if judgment.severity != Severity::Info {
                    let note = judgment.as_note();
                    trace.judgment(&note);
                    state.conversation.push(Message::system(note));
                }
            }
        }

        // Step budget exhausted: bounded final answer with a progress
        // summary.
        let answer = step_limit_answer(&state);
        state.execution.add_step(Step::respond(&answer));
        trace.run_end(true, "step limit reached");
        let result = LoopResult {
            success: true,
            final_answer: answer,
            error: None,
            steps_used: state.execution.current_step,
        };
        (result, state)
    }

    /// Dispatches one call subject to budget, blocking judge check, and
    /// safety rules. Returns the result and an optional blocking judgment.
    fn dispatch_one(
        &self,
        state: &mut AgentState,
        trace: &TraceLogger,
        call: &ToolCall,
    ) -> (ToolResult, Option<Judgment>) {
        if !state.execution.has_tool_budget() {
            let err = ToolError::rules(
                "BUDGET_EXCEEDED",
                format!(
                    "per-step tool budget of {} reached; the budget resets next step",
                    state.execution.max_tools_per_step
                ),
            );
            return (ToolResult::failure(&call.id, &err), None);
        }

        if let Some(judgment) = crate::judge::Judge::check_write_target(self.engine.sandbox(), call)
        {
            let err = ToolError::workspace(
                "PATH_OUTSIDE_WORKSPACE",
                judgment.reason.clone().unwrap_or_default(),
            );
            return (ToolResult::failure(&call.id, &err), Some(judgment));
        }

        let (allowed, violations) = self.engine.rules().evaluate(call);
        if !allowed {
            let first = &violations[0];
            let err = ToolError::rules("RULE_VIOLATION", first.reason.clone())
                .with_context(serde_json::json!({"rule": first.rule_name}));
            return (ToolResult::failure(&call.id, &err), None);
        }

        if !self.engine.registry().contains(&call.name) {
            let err = ToolError::missing("TOOL_NOT_FOUND", format!("no such tool: {}", call.name));
            return (ToolResult::failure(&call.id, &err), None);
        }

        state.execution.consume_tool_budget();
        let timer = trace.call(&call.name, &call.id);
        let result = self.engine.registry().dispatch(call);
        trace.result(&call.name, &call.id, timer, result.success);
        (result, None)
    }

    fn complete_with_retry(
        &self,
        state: &AgentState,
        specs: &[crate::tools::ToolSpec],
    ) -> std::result::Result<Completion, GatewayError> {
        let mut last_error = GatewayError::Unavailable {
            reason: "no attempts made".to_string(),
        };
        for attempt in 0..GATEWAY_ATTEMPTS {
            match self.gateway.complete(&state.conversation.messages, specs) {
                Ok(completion) => return Ok(completion),
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "gateway attempt failed");
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    fn abort(
        &self,
        trace: &TraceLogger,
        state: AgentState,
        message: &str,
    ) -> (LoopResult, AgentState) {
        trace.run_end(false, message);
        let result = LoopResult {
            success: false,
            final_answer: String::new(),
            error: Some(message.to_string()),
            steps_used: state.execution.current_step,
        };
        (result, state)
    }
}

/// Bounded final answer when the step budget runs out.
fn step_limit_answer(state: &AgentState) -> String {
    let tool_calls: usize = state
        .execution
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::CallTool)
        .map(|s| s.tool_calls.len())
        .sum();
    let failures: usize = state
        .execution
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::Observe)
        .flat_map(|s| s.tool_results.iter())
        .filter(|r| !r.success)
        .count();
    let last_observation = state
        .execution
        .steps
        .iter()
        .rev()
        .find(|s| s.step_type == StepType::Observe)
        .and_then(|s| s.tool_results.last())
        .map(|r| crate::store::index::bounded_graphemes(r.observed_text(), 200))
        .unwrap_or_default();

    format!(
        "Step limit reached after {} steps ({tool_calls} tool calls, {failures} failed). \
         Progress is preserved in the workspace; resume with a queued task. \
         Last observation: {last_observation}",
        state.execution.current_step
    )
}
