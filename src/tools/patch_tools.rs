//! Patch protocol tools: `create_patch`, `list_patches`, `get_patch`.
//!
//! The loop never applies patches; `create_patch` returns the command an
//! external operator runs.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::{Tool, ToolOutcome, parse_args, schema};
use crate::error::ToolError;
use crate::patch::{PatchDraft, PatchManager, PatchStatus};

#[derive(Debug, Deserialize)]
struct CreateParams {
    title: String,
    description: String,
    target_files: Vec<String>,
    plan: String,
    diff: String,
    tests: String,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GetParams {
    patch_id: String,
}

/// Creates a reviewable patch bundle.
pub struct CreatePatchTool {
    patches: Arc<PatchManager>,
}

impl CreatePatchTool {
    /// Creates the tool over the shared patch manager.
    #[must_use]
    pub fn new(patches: Arc<PatchManager>) -> Self {
        Self { patches }
    }
}

impl Tool for CreatePatchTool {
    fn name(&self) -> &'static str {
        "create_patch"
    }

    fn description(&self) -> &'static str {
        "Propose a change to project source as a reviewable patch bundle (plan, diff, tests)"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[
                ("title", schema::string("Short patch title")),
                ("description", schema::string("What the patch does and why")),
                ("target_files", schema::string_array("Project files the diff touches")),
                ("plan", schema::string("Implementation plan (markdown)")),
                ("diff", schema::string("Unified diff")),
                ("tests", schema::string("Test plan (markdown)")),
            ],
            &["title", "description", "target_files", "plan", "diff", "tests"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: CreateParams = parse_args(arguments)?;
        let created = self.patches.create(&PatchDraft {
            title: params.title,
            description: params.description,
            target_files: params.target_files,
            plan: params.plan,
            diff: params.diff,
            tests: params.tests,
        })?;
        Ok(format!(
            "patch {} created (status: proposed)\napply with: {}",
            created.patch_id, created.apply_command
        ))
    }
}

/// Lists patch bundles, optionally by status.
pub struct ListPatchesTool {
    patches: Arc<PatchManager>,
}

impl ListPatchesTool {
    /// Creates the tool over the shared patch manager.
    #[must_use]
    pub fn new(patches: Arc<PatchManager>) -> Self {
        Self { patches }
    }
}

impl Tool for ListPatchesTool {
    fn name(&self) -> &'static str {
        "list_patches"
    }

    fn description(&self) -> &'static str {
        "List patch bundles, newest first, optionally filtered by status"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[(
                "status",
                schema::string_enum(
                    "Only patches with this status",
                    &["proposed", "applied", "tested", "failed", "rejected"],
                ),
            )],
            &[],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: ListParams = parse_args(arguments)?;
        let status = match params.status.as_deref() {
            None => None,
            Some(raw) => Some(raw.parse::<PatchStatus>().map_err(|e| {
                ToolError::rules("SCHEMA_VIOLATION", e)
            })?),
        };
        let patches = self.patches.list(status)?;
        if patches.is_empty() {
            return Ok("no patches".to_string());
        }
        let lines: Vec<String> = patches
            .iter()
            .map(|p| {
                format!(
                    "{} [{}] {} -> {}",
                    p.patch_id,
                    p.status,
                    p.title,
                    p.target_files.join(", ")
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Retrieves a full patch bundle.
pub struct GetPatchTool {
    patches: Arc<PatchManager>,
}

impl GetPatchTool {
    /// Creates the tool over the shared patch manager.
    #[must_use]
    pub fn new(patches: Arc<PatchManager>) -> Self {
        Self { patches }
    }
}

impl Tool for GetPatchTool {
    fn name(&self) -> &'static str {
        "get_patch"
    }

    fn description(&self) -> &'static str {
        "Retrieve a patch bundle's plan, diff, tests, and metadata"
    }

    fn parameters(&self) -> Value {
        schema::object(&[("patch_id", schema::string("Patch identifier"))], &["patch_id"])
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: GetParams = parse_args(arguments)?;
        let patch = self.patches.get(&params.patch_id)?;
        let meta = &patch.metadata;
        Ok(format!(
            "patch {} [{}]\ntitle: {}\ndescription: {}\ntargets: {}\n\n## Plan\n{}\n\n## Diff\n{}\n\n## Tests\n{}",
            meta.patch_id,
            meta.status,
            meta.title,
            meta.description,
            meta.target_files.join(", "),
            patch.plan_md,
            patch.diff_text,
            patch.tests_md,
        ))
    }
}
