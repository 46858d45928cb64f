//! System prompt composition: workflow policy plus the tool catalogue.

use std::fmt::Write;
use std::path::Path;

use crate::tools::ToolSpec;

/// Workflow policy prepended to every run.
const WORKFLOW_POLICY: &str = r"You are a repository agent working inside a sandboxed workspace.

## Rules

1. All writes go under the workspace. Project source changes ONLY through create_patch; you never apply patches yourself.
2. Ground every claim about code with search_chunks and cite the chunk_id in your answer.
3. After writing files or creating a patch, schedule a test run (shell or subprocess_exec).
4. Budgets are real: a limited number of tool calls per step and steps per run. When the budget blocks a call, it resets on the next step.
5. Process one queue task per run: queue_next, do the work, then queue_done or queue_fail with a checkpoint.
6. Tool failures come back as structured ERROR blocks; read the code and adapt instead of repeating the same call.

Reply with a final answer when the objective is met or genuinely blocked.";

/// Composes the system prompt: policy, project context, tool catalogue.
#[must_use]
pub fn compose(tools: &[ToolSpec], workspace_root: &Path, project_root: &Path) -> String {
    let mut out = String::from(WORKFLOW_POLICY);
    let _ = write!(
        out,
        "\n\n## Context\n\nworkspace root: {}\nproject root (read-only): {}\n\n## Tools\n",
        workspace_root.display(),
        project_root.display()
    );
    for tool in tools {
        let _ = write!(out, "\n### {}\n{}\n", tool.name, tool.description);
        if let Some(required) = tool.parameters.get("required").and_then(|r| r.as_array()) {
            let names: Vec<&str> = required.iter().filter_map(|v| v.as_str()).collect();
            if !names.is_empty() {
                let _ = writeln!(out, "required: {}", names.join(", "));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compose_includes_policy_context_and_tools() {
        let tools = vec![ToolSpec {
            name: "read_file".to_string(),
            description: "Read a file".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"],
            }),
        }];
        let prompt = compose(&tools, Path::new("/p/workspace"), Path::new("/p"));

        assert!(prompt.contains("create_patch"));
        assert!(prompt.contains("workspace root: /p/workspace"));
        assert!(prompt.contains("### read_file"));
        assert!(prompt.contains("required: path"));
    }
}
