//! Patch bundles: the only path by which project source changes.
//!
//! A patch is a reviewable directory under `workspace/patches/<patch_id>/`
//! holding `plan.md`, `patch.diff`, `tests.md`, and `metadata.json`. The
//! agent proposes patches; an external applier advances their status. Patch
//! files are immutable after creation; only status and timestamps mutate.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::ids;
use crate::error::PatchError;
use crate::store::write_atomic;

/// Plan file name inside a bundle.
pub const PLAN_FILE: &str = "plan.md";
/// Diff file name inside a bundle.
pub const DIFF_FILE: &str = "patch.diff";
/// Tests file name inside a bundle.
pub const TESTS_FILE: &str = "tests.md";
/// Metadata file name inside a bundle.
pub const METADATA_FILE: &str = "metadata.json";

/// Lifecycle status of a patch bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchStatus {
    /// Created by the agent, awaiting review.
    Proposed,
    /// Applied to the project by an external operator.
    Applied,
    /// Applied and verified by a test run.
    Tested,
    /// Application or verification failed.
    Failed,
    /// Reviewed and declined.
    Rejected,
}

impl std::fmt::Display for PatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Proposed => "proposed",
            Self::Applied => "applied",
            Self::Tested => "tested",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for PatchStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "proposed" => Ok(Self::Proposed),
            "applied" => Ok(Self::Applied),
            "tested" => Ok(Self::Tested),
            "failed" => Ok(Self::Failed),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown patch status: {other}")),
        }
    }
}

/// Metadata persisted as `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchMetadata {
    /// `YYYYMMDD_HHMMSS_<slug>` identifier.
    pub patch_id: String,
    /// Short title.
    pub title: String,
    /// What the patch does and why.
    pub description: String,
    /// Project files the diff touches.
    pub target_files: Vec<String>,
    /// Lifecycle status.
    pub status: PatchStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// A full patch bundle: metadata plus the three content files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Bundle metadata.
    pub metadata: PatchMetadata,
    /// Implementation plan markdown.
    pub plan_md: String,
    /// Unified diff text.
    pub diff_text: String,
    /// Test plan markdown.
    pub tests_md: String,
}

/// Input to [`PatchManager::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchDraft {
    /// Short title (becomes part of the patch ID).
    pub title: String,
    /// What the patch does and why.
    pub description: String,
    /// Project files the diff touches.
    pub target_files: Vec<String>,
    /// Implementation plan markdown.
    pub plan: String,
    /// Unified diff text.
    pub diff: String,
    /// Test plan markdown.
    pub tests: String,
}

/// Result of creating a patch bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedPatch {
    /// Assigned patch ID.
    pub patch_id: String,
    /// Command an external operator runs to apply the diff.
    pub apply_command: String,
}

/// Creates, retrieves, lists, and status-updates patch bundles.
#[derive(Debug, Clone)]
pub struct PatchManager {
    patches_dir: PathBuf,
}

impl PatchManager {
    /// Creates a manager over the given patches directory.
    #[must_use]
    pub fn new(patches_dir: impl Into<PathBuf>) -> Self {
        Self {
            patches_dir: patches_dir.into(),
        }
    }

    /// The patches directory.
    #[must_use]
    pub fn patches_dir(&self) -> &Path {
        &self.patches_dir
    }

    /// Creates a patch bundle from a draft.
    ///
    /// # Errors
    ///
    /// [`PatchError::MissingField`] when any field is empty,
    /// [`PatchError::NoTargets`] when `target_files` is empty,
    /// [`PatchError::InvalidDiff`] when the diff is empty or not a unified
    /// diff.
    pub fn create(&self, draft: &PatchDraft) -> std::result::Result<CreatedPatch, PatchError> {
        for (field, value) in [
            ("title", &draft.title),
            ("description", &draft.description),
            ("plan", &draft.plan),
            ("tests", &draft.tests),
        ] {
            if value.trim().is_empty() {
                return Err(PatchError::MissingField {
                    field: field.to_string(),
                });
            }
        }
        if draft.target_files.is_empty() || draft.target_files.iter().all(|t| t.trim().is_empty()) {
            return Err(PatchError::NoTargets);
        }
        validate_unified_diff(&draft.diff)?;

        let created_at = Utc::now();
        let patch_id = self.unique_patch_id(created_at, &draft.title);
        let dir = self.patches_dir.join(&patch_id);
        std::fs::create_dir_all(&dir).map_err(|e| PatchError::Io {
            path: dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let metadata = PatchMetadata {
            patch_id: patch_id.clone(),
            title: draft.title.clone(),
            description: draft.description.clone(),
            target_files: draft.target_files.clone(),
            status: PatchStatus::Proposed,
            created_at,
            updated_at: created_at,
        };

        self.write_file(&dir, PLAN_FILE, draft.plan.as_bytes())?;
        self.write_file(&dir, DIFF_FILE, draft.diff.as_bytes())?;
        self.write_file(&dir, TESTS_FILE, draft.tests.as_bytes())?;
        self.write_file(&dir, METADATA_FILE, &serde_json::to_vec_pretty(&metadata)?)?;

        let apply_command = format!(
            "git apply {}",
            dir.join(DIFF_FILE).display()
        );
        Ok(CreatedPatch {
            patch_id,
            apply_command,
        })
    }

    /// Validates a bundle on disk: all four files present and the diff
    /// parseable.
    ///
    /// # Errors
    ///
    /// [`PatchError::NotFound`] for a missing bundle or file,
    /// [`PatchError::InvalidDiff`] for an unparseable diff.
    pub fn validate(&self, patch_id: &str) -> std::result::Result<(), PatchError> {
        let dir = self.bundle_dir(patch_id)?;
        for file in [PLAN_FILE, DIFF_FILE, TESTS_FILE, METADATA_FILE] {
            if !dir.join(file).is_file() {
                return Err(PatchError::NotFound {
                    id: format!("{patch_id}/{file}"),
                });
            }
        }
        let diff = std::fs::read_to_string(dir.join(DIFF_FILE)).map_err(|e| PatchError::Io {
            path: dir.join(DIFF_FILE).display().to_string(),
            reason: e.to_string(),
        })?;
        validate_unified_diff(&diff)
    }

    /// Lists patch metadata, newest first, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`PatchError`] on unreadable metadata.
    pub fn list(
        &self,
        status: Option<PatchStatus>,
    ) -> std::result::Result<Vec<PatchMetadata>, PatchError> {
        let mut out = Vec::new();
        let entries = match std::fs::read_dir(&self.patches_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => {
                return Err(PatchError::Io {
                    path: self.patches_dir.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        for entry in entries.filter_map(std::result::Result::ok) {
            let metadata_path = entry.path().join(METADATA_FILE);
            if !metadata_path.is_file() {
                continue;
            }
            let bytes = std::fs::read(&metadata_path).map_err(|e| PatchError::Io {
                path: metadata_path.display().to_string(),
                reason: e.to_string(),
            })?;
            let metadata: PatchMetadata = serde_json::from_slice(&bytes)?;
            if status.is_none_or(|s| metadata.status == s) {
                out.push(metadata);
            }
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.patch_id.cmp(&a.patch_id)));
        Ok(out)
    }

    /// Retrieves a full bundle.
    ///
    /// # Errors
    ///
    /// [`PatchError::NotFound`] when the bundle is absent.
    pub fn get(&self, patch_id: &str) -> std::result::Result<Patch, PatchError> {
        let dir = self.bundle_dir(patch_id)?;
        let read = |file: &str| -> std::result::Result<String, PatchError> {
            std::fs::read_to_string(dir.join(file)).map_err(|e| PatchError::Io {
                path: dir.join(file).display().to_string(),
                reason: e.to_string(),
            })
        };
        let metadata: PatchMetadata = serde_json::from_str(&read(METADATA_FILE)?)?;
        Ok(Patch {
            metadata,
            plan_md: read(PLAN_FILE)?,
            diff_text: read(DIFF_FILE)?,
            tests_md: read(TESTS_FILE)?,
        })
    }

    /// Transitions a patch to a new status, stamping `updated_at`. Content
    /// files are never touched.
    ///
    /// # Errors
    ///
    /// [`PatchError::NotFound`] when the bundle is absent.
    pub fn update_status(
        &self,
        patch_id: &str,
        status: PatchStatus,
    ) -> std::result::Result<PatchMetadata, PatchError> {
        let dir = self.bundle_dir(patch_id)?;
        let metadata_path = dir.join(METADATA_FILE);
        let bytes = std::fs::read(&metadata_path).map_err(|e| PatchError::Io {
            path: metadata_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut metadata: PatchMetadata = serde_json::from_slice(&bytes)?;
        metadata.status = status;
        metadata.updated_at = Utc::now();
        write_atomic(&metadata_path, &serde_json::to_vec_pretty(&metadata)?).map_err(|e| {
            PatchError::Io {
                path: metadata_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(metadata)
    }

    fn bundle_dir(&self, patch_id: &str) -> std::result::Result<PathBuf, PatchError> {
        // Patch IDs never contain separators; refuse anything that could
        // escape the patches directory.
        if patch_id.contains(['/', '\\']) || patch_id.contains("..") {
            return Err(PatchError::NotFound {
                id: patch_id.to_string(),
            });
        }
        let dir = self.patches_dir.join(patch_id);
        if !dir.is_dir() {
            return Err(PatchError::NotFound {
                id: patch_id.to_string(),
            });
        }
        Ok(dir)
    }

    fn unique_patch_id(&self, created_at: DateTime<Utc>, title: &str) -> String {
        let base = ids::patch_id(created_at, title);
        if !self.patches_dir.join(&base).exists() {
            return base;
        }
        let mut counter = 2;
        loop {
            let candidate = format!("{base}_{counter}");
            if !self.patches_dir.join(&candidate).exists() {
                return candidate;
            }
            counter += 1;
        }
    }

    fn write_file(
        &self,
        dir: &Path,
        name: &str,
        bytes: &[u8],
    ) -> std::result::Result<(), PatchError> {
        let path = dir.join(name);
        write_atomic(&path, bytes).map_err(|e| PatchError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Structural unified-diff validation: non-empty, file headers present
/// (`---`/`+++` or `diff --git`), and at least one `@@` hunk.
///
/// # Errors
///
/// Returns [`PatchError::InvalidDiff`] with the failed check.
pub fn validate_unified_diff(diff: &str) -> std::result::Result<(), PatchError> {
    static HUNK: OnceLock<Regex> = OnceLock::new();
    let hunk = HUNK.get_or_init(|| {
        Regex::new(r"(?m)^@@ -\d+(,\d+)? \+\d+(,\d+)? @@").expect("valid regex")
    });

    if diff.trim().is_empty() {
        return Err(PatchError::InvalidDiff {
            reason: "diff is empty".to_string(),
        });
    }
    let has_file_headers = diff.lines().any(|l| l.starts_with("--- "))
        && diff.lines().any(|l| l.starts_with("+++ "));
    let has_git_header = diff.lines().any(|l| l.starts_with("diff --git "));
    if !has_file_headers && !has_git_header {
        return Err(PatchError::InvalidDiff {
            reason: "missing ---/+++ file headers".to_string(),
        });
    }
    if !hunk.is_match(diff) {
        return Err(PatchError::InvalidDiff {
            reason: "no @@ hunk headers".to_string(),
        });
    }
    Ok(())
}
