//! Advisory workflow inspector over the run's step history.
//!
//! The judge reads the append-only steps after each loop iteration and
//! produces judgments. Warnings surface to the model as system notes;
//! only the project-file-write check carries `Error` severity and blocks
//! a tool call.

use serde::{Deserialize, Serialize};

use crate::core::{ExecutionContext, Step, StepType, ToolCall};
use crate::sandbox::{Sandbox, lexical_normalize};

/// Judgment severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Silent; recorded only.
    Info,
    /// Surfaced to the model as a system note.
    Warning,
    /// Blocks the offending tool call.
    Error,
}

/// One judgment over the step history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    /// Whether the inspected behavior passed.
    pub passed: bool,
    /// Why it did not pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// What to do about it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Severity of the finding.
    pub severity: Severity,
}

impl Judgment {
    fn warning(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            suggestion: Some(suggestion.into()),
            severity: Severity::Warning,
        }
    }

    fn error(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            suggestion: None,
            severity: Severity::Error,
        }
    }

    /// Renders the judgment as a system note for the model.
    #[must_use]
    pub fn as_note(&self) -> String {
        let mut note = format!(
            "[judge:{}] {}",
            match self.severity {
                Severity::Info => "info",
                Severity::Warning => "warning",
                Severity::Error => "error",
            },
            self.reason.as_deref().unwrap_or("ok")
        );
        if let Some(suggestion) = &self.suggestion {
            note.push_str(" - ");
            note.push_str(suggestion);
        }
        note
    }
}

/// Judge configuration.
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Window for the identical-call loop detector.
    pub repeat_window: usize,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self { repeat_window: 5 }
    }
}

/// The workflow judge.
#[derive(Debug, Clone, Default)]
pub struct Judge {
    config: JudgeConfig,
}

impl Judge {
    /// Creates a judge with explicit configuration.
    #[must_use]
    pub fn new(config: JudgeConfig) -> Self {
        Self { config }
    }

    /// Runs the advisory checks over the step history. `assistant_text` is
    /// the model's latest assistant message, used for test-scheduling and
    /// patch-discipline heuristics.
    #[must_use]
    pub fn review(&self, execution: &ExecutionContext, assistant_text: &str) -> Vec<Judgment> {
        let mut judgments = Vec::new();
        if let Some(j) = self.check_repetition(&execution.steps) {
            judgments.push(j);
        }
        if let Some(j) = check_write_without_test(&execution.steps, assistant_text) {
            judgments.push(j);
        }
        if let Some(j) = check_repeated_shell_errors(&execution.steps) {
            judgments.push(j);
        }
        if let Some(j) = check_patch_discipline(&execution.steps, assistant_text) {
            judgments.push(j);
        }
        if let Some(j) = check_budget_exhaustion(&execution.steps, assistant_text) {
            judgments.push(j);
        }
        judgments
    }

    /// Blocking check: a `write_file` whose target resolves under the
    /// project root but outside the workspace must be refused.
    #[must_use]
    pub fn check_write_target(sandbox: &Sandbox, call: &ToolCall) -> Option<Judgment> {
        if call.name != "write_file" {
            return None;
        }
        let path = call.arguments.get("path")?.as_str()?;
        let raw = std::path::Path::new(path);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            sandbox.workspace_root().join(raw)
        };
        let normalized = lexical_normalize(&joined);
        if normalized.starts_with(sandbox.project_root())
            && !normalized.starts_with(sandbox.workspace_root())
        {
            return Some(Judgment::error(format!(
                "write_file targets project source outside the workspace: {path}; propose the change with create_patch instead"
            )));
        }
        None
    }

    fn check_repetition(&self, steps: &[Step]) -> Option<Judgment> {
        let calls: Vec<&ToolCall> = steps
            .iter()
            .filter(|s| s.step_type == StepType::CallTool)
            .flat_map(|s| s.tool_calls.iter())
            .collect();
        if calls.len() < self.config.repeat_window {
            return None;
        }
        let window = &calls[calls.len() - self.config.repeat_window..];
        let first = window[0];
        let all_identical = window
            .iter()
            .all(|c| c.name == first.name && c.arguments == first.arguments);
        all_identical.then(|| {
            Judgment::warning(
                format!(
                    "the last {} tool calls were '{}' with identical arguments",
                    self.config.repeat_window, first.name
                ),
                "vary the approach: different arguments, a different tool, or step back and reassess",
            )
        })
    }
}

/// Tool names whose invocation counts as running tests when the arguments
/// look test-shaped.
fn runs_tests(call: &ToolCall) -> bool {
    if call.name != "shell" && call.name != "subprocess_exec" {
        return false;
    }
    let text = call.arguments.to_string().to_lowercase();
    text.contains("test") || text.contains("pytest") || text.contains("unittest")
}

fn schedules_tests(assistant_text: &str) -> bool {
    assistant_text.to_lowercase().contains("test")
}

fn check_write_without_test(steps: &[Step], assistant_text: &str) -> Option<Judgment> {
    let calls: Vec<&ToolCall> = steps
        .iter()
        .filter(|s| s.step_type == StepType::CallTool)
        .flat_map(|s| s.tool_calls.iter())
        .collect();
    let last_write = calls
        .iter()
        .rposition(|c| c.name == "write_file" || c.name == "create_patch")?;
    let tested_after = calls[last_write + 1..].iter().any(|c| runs_tests(c));
    if tested_after {
        return None;
    }
    let budget_blocked = steps.iter().any(|s| {
        s.step_type == StepType::Observe
            && s.tool_results
                .iter()
                .any(|r| r.observed_text().contains("BUDGET_EXCEEDED"))
    });
    if budget_blocked && schedules_tests(assistant_text) {
        return None;
    }
    Some(Judgment::warning(
        "files or patches were written without a subsequent test run",
        "DO THIS NEXT: run tests",
    ))
}

fn check_repeated_shell_errors(steps: &[Step]) -> Option<Judgment> {
    // Chronological (tool, success) pairs, with call names joined by id.
    let mut names = std::collections::HashMap::new();
    for step in steps {
        for call in &step.tool_calls {
            names.insert(call.id.as_str(), call.name.as_str());
        }
    }
    let mut sequence = Vec::new();
    for step in steps {
        if step.step_type != StepType::Observe {
            continue;
        }
        for result in &step.tool_results {
            if let Some(name) = names.get(result.tool_call_id.as_str()) {
                sequence.push((*name, result.success));
            }
        }
    }

    let mut consecutive_shell_failures = 0usize;
    for (name, success) in sequence {
        match (name, success) {
            ("shell", false) => {
                consecutive_shell_failures += 1;
                if consecutive_shell_failures >= 2 {
                    return Some(Judgment::warning(
                        "two consecutive shell commands failed without intervening analysis",
                        "read the error output (read_file or search_chunks) before retrying",
                    ));
                }
            }
            ("shell", true) | ("read_file" | "search_chunks" | "data_view", _) => {
                consecutive_shell_failures = 0;
            }
            _ => {}
        }
    }
    None
}

fn check_patch_discipline(steps: &[Step], assistant_text: &str) -> Option<Judgment> {
    // Heuristic: assistant text carrying diff markers or edit language
    // about project source, with no create_patch in the run.
    let proposes_edit = assistant_text.contains("--- a/")
        || assistant_text.contains("+++ b/")
        || (assistant_text.to_lowercase().contains("edit")
            && assistant_text.contains(".py")
            && !assistant_text.contains("workspace/"));
    if !proposes_edit {
        return None;
    }
    let created_patch = steps
        .iter()
        .filter(|s| s.step_type == StepType::CallTool)
        .flat_map(|s| s.tool_calls.iter())
        .any(|c| c.name == "create_patch");
    if created_patch {
        return None;
    }
    Some(Judgment::warning(
        "the response proposes project-source changes without a patch bundle",
        "funnel the change through create_patch so it can be reviewed and applied",
    ))
}

fn check_budget_exhaustion(steps: &[Step], assistant_text: &str) -> Option<Judgment> {
    let last_observe = steps
        .iter()
        .rev()
        .find(|s| s.step_type == StepType::Observe)?;
    let blocked = last_observe
        .tool_results
        .iter()
        .any(|r| r.observed_text().contains("BUDGET_EXCEEDED"));
    if !blocked || schedules_tests(assistant_text) {
        return None;
    }
    Some(Judgment::warning(
        "the per-step tool budget blocked remaining calls",
        "the budget resets next step; schedule the outstanding work (tests included) explicitly",
    ))
}
