//! Error types for codeloom operations.
//!
//! Two error surfaces live here. The `thiserror` hierarchy (`Error` and the
//! per-subsystem enums) is what internal APIs return and propagate with `?`.
//! [`ToolError`] is the structured failure shape surfaced to the model and
//! the user: a `blocked_by` category, a `SCREAMING_SNAKE` code, a message,
//! and optional JSON context, rendered as a fixed three-line block.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for codeloom operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error types for codeloom operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Sandbox path resolution or resource errors.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// Chunk or vector store errors.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Patch bundle errors.
    #[error("patch error: {0}")]
    Patch(#[from] PatchError),

    /// Task queue errors.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Model gateway errors.
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Generic I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid state errors.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Description of the invalid state.
        message: String,
    },

    /// Configuration errors.
    #[error("configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },
}

/// Sandbox-specific errors for path resolution and resource limits.
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Path resolves outside the workspace root.
    #[error("path escapes the workspace: {path}")]
    OutsideWorkspace {
        /// Path that was denied.
        path: String,
    },

    /// Path resolves outside the project root.
    #[error("path escapes the project: {path}")]
    OutsideProject {
        /// Path that was denied.
        path: String,
    },

    /// Path matches the blocked directory or sensitive-pattern set.
    #[error("path is blocked: {path}")]
    BlockedPath {
        /// Path that was denied.
        path: String,
    },

    /// File or directory does not exist.
    #[error("not found: {path}")]
    NotFound {
        /// Path that was not found.
        path: String,
    },

    /// Expected a directory, found something else.
    #[error("not a directory: {path}")]
    NotADirectory {
        /// Offending path.
        path: String,
    },

    /// Expected a regular file, found something else.
    #[error("not a file: {path}")]
    NotAFile {
        /// Offending path.
        path: String,
    },

    /// Workspace size or free-RAM limit exceeded.
    #[error("resource limit: {reason}")]
    ResourceLimit {
        /// What limit was hit.
        reason: String,
    },

    /// Underlying filesystem failure during resolution.
    #[error("sandbox I/O failure: {path}: {reason}")]
    Io {
        /// Path involved.
        path: String,
        /// Reason for failure.
        reason: String,
    },
}

/// Chunk and vector store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Persisted index failed structural validation.
    #[error("corrupted index: {reason}")]
    CorruptedIndex {
        /// What failed validation.
        reason: String,
    },

    /// Embedding gateway failure (soft: retrieval falls back to keyword).
    #[error("embedding failed: {reason}")]
    EmbedFailed {
        /// Reason for failure.
        reason: String,
    },

    /// Embedding dimension does not match the store.
    #[error("dimension mismatch: store has {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension recorded in store metadata.
        expected: usize,
        /// Dimension of the offered vector.
        actual: usize,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure while persisting or loading.
    #[error("store I/O failure: {path}: {reason}")]
    Io {
        /// Path involved.
        path: String,
        /// Reason for failure.
        reason: String,
    },
}

/// Patch bundle errors.
#[derive(Error, Debug)]
pub enum PatchError {
    /// A required patch field is empty.
    #[error("patch field must not be empty: {field}")]
    MissingField {
        /// Name of the empty field.
        field: String,
    },

    /// `target_files` is empty.
    #[error("patch has no target files")]
    NoTargets,

    /// Diff text is empty or not a unified diff.
    #[error("invalid diff: {reason}")]
    InvalidDiff {
        /// Why the diff was rejected.
        reason: String,
    },

    /// Patch bundle not found.
    #[error("patch not found: {id}")]
    NotFound {
        /// Patch ID that was not found.
        id: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure in the patches directory.
    #[error("patch I/O failure: {path}: {reason}")]
    Io {
        /// Path involved.
        path: String,
        /// Reason for failure.
        reason: String,
    },
}

/// Task queue errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Task not found by ID.
    #[error("task not found: {id}")]
    TaskNotFound {
        /// Task ID that was not found.
        id: String,
    },

    /// Attempted transition out of a terminal status.
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Task ID.
        id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Filesystem failure in the queue directory.
    #[error("queue I/O failure: {path}: {reason}")]
    Io {
        /// Path involved.
        path: String,
        /// Reason for failure.
        reason: String,
    },
}

/// Model gateway errors.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Gateway could not be reached (after retries, fatal for the run).
    #[error("gateway unavailable: {reason}")]
    Unavailable {
        /// Reason for failure.
        reason: String,
    },

    /// Gateway returned a response the loop cannot interpret.
    #[error("malformed gateway response: {reason}")]
    Malformed {
        /// What was wrong with the response.
        reason: String,
    },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for PatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// ==================== ToolError surface ====================

/// Category a failed tool call was blocked by.
///
/// This is a closed set; every surfaced failure carries exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockedBy {
    /// Safety rules, schema validation, or budget discipline.
    Rules,
    /// Sandbox containment or blocked paths.
    Workspace,
    /// A referenced tool, file, patch, or task does not exist.
    Missing,
    /// Execution failure: I/O, timeout, resource limit, corruption.
    Runtime,
    /// Operation requires privileges the runtime does not hold.
    Permission,
}

impl std::fmt::Display for BlockedBy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Rules => "rules",
            Self::Workspace => "workspace",
            Self::Missing => "missing",
            Self::Runtime => "runtime",
            Self::Permission => "permission",
        };
        f.write_str(s)
    }
}

/// Structured failure surfaced by tools and the loop.
///
/// Rendered as a fixed three-line block (code, category, message) followed
/// by an optional JSON context block:
///
/// ```text
/// ERROR [PATH_OUTSIDE_WORKSPACE]
/// Blocked by: workspace
/// Message: path escapes the workspace: ../etc/passwd
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    /// Category this failure was blocked by.
    pub blocked_by: BlockedBy,
    /// Stable `SCREAMING_SNAKE` error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ToolError {
    /// Creates a new tool error.
    #[must_use]
    pub fn new(blocked_by: BlockedBy, code: &str, message: impl Into<String>) -> Self {
        Self {
            blocked_by,
            code: code.to_string(),
            message: message.into(),
            context: None,
        }
    }

    /// Attaches structured context to the error.
    #[must_use]
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Shorthand for a `rules` error.
    #[must_use]
    pub fn rules(code: &str, message: impl Into<String>) -> Self {
        Self::new(BlockedBy::Rules, code, message)
    }

    /// Shorthand for a `workspace` error.
    #[must_use]
    pub fn workspace(code: &str, message: impl Into<String>) -> Self {
        Self::new(BlockedBy::Workspace, code, message)
    }

    /// Shorthand for a `missing` error.
    #[must_use]
    pub fn missing(code: &str, message: impl Into<String>) -> Self {
        Self::new(BlockedBy::Missing, code, message)
    }

    /// Shorthand for a `runtime` error.
    #[must_use]
    pub fn runtime(code: &str, message: impl Into<String>) -> Self {
        Self::new(BlockedBy::Runtime, code, message)
    }

    /// Renders the fixed three-line error block.
    #[must_use]
    pub fn format(&self) -> String {
        let mut out = format!(
            "ERROR [{}]\nBlocked by: {}\nMessage: {}",
            self.code, self.blocked_by, self.message
        );
        if let Some(ctx) = &self.context {
            out.push_str("\nContext: ");
            out.push_str(&serde_json::to_string(ctx).unwrap_or_else(|_| "{}".to_string()));
        }
        out
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

impl From<SandboxError> for ToolError {
    fn from(err: SandboxError) -> Self {
        let message = err.to_string();
        match err {
            SandboxError::OutsideWorkspace { .. } | SandboxError::OutsideProject { .. } => {
                Self::workspace("PATH_OUTSIDE_WORKSPACE", message)
            }
            SandboxError::BlockedPath { .. } => Self::workspace("BLOCKED_PATH", message),
            SandboxError::NotFound { .. } => Self::missing("FILE_NOT_FOUND", message),
            SandboxError::NotADirectory { .. } => Self::missing("NOT_A_DIRECTORY", message),
            SandboxError::NotAFile { .. } => Self::missing("NOT_A_FILE", message),
            SandboxError::ResourceLimit { .. } => Self::runtime("RESOURCE_LIMIT", message),
            SandboxError::Io { .. } => Self::runtime("SANDBOX_IO", message),
        }
    }
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::CorruptedIndex { .. } | StoreError::DimensionMismatch { .. } => {
                Self::runtime("CORRUPTED_INDEX", message)
            }
            StoreError::EmbedFailed { .. } => Self::runtime("EMBED_FAILED", message),
            StoreError::Serialization(_) | StoreError::Io { .. } => {
                Self::runtime("STORE_IO", message)
            }
        }
    }
}

impl From<PatchError> for ToolError {
    fn from(err: PatchError) -> Self {
        let message = err.to_string();
        match err {
            PatchError::MissingField { .. } => Self::rules("PATCH_MISSING_FIELDS", message),
            PatchError::NoTargets => Self::rules("PATCH_NO_TARGETS", message),
            PatchError::InvalidDiff { .. } => Self::rules("PATCH_INVALID", message),
            PatchError::NotFound { .. } => Self::missing("PATCH_NOT_FOUND", message),
            PatchError::Serialization(_) | PatchError::Io { .. } => {
                Self::runtime("PATCH_IO", message)
            }
        }
    }
}

impl From<QueueError> for ToolError {
    fn from(err: QueueError) -> Self {
        let message = err.to_string();
        match err {
            QueueError::TaskNotFound { .. } => Self::missing("TASK_NOT_FOUND", message),
            QueueError::InvalidTransition { .. } => {
                Self::runtime("TASK_INVALID_TRANSITION", message)
            }
            QueueError::Serialization(_) | QueueError::Io { .. } => {
                Self::runtime("QUEUE_IO", message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidState {
            message: "test error".to_string(),
        };
        assert_eq!(err.to_string(), "invalid state: test error");
    }

    #[test]
    fn test_sandbox_error_display() {
        let err = SandboxError::OutsideWorkspace {
            path: "../etc/passwd".to_string(),
        };
        assert_eq!(err.to_string(), "path escapes the workspace: ../etc/passwd");

        let err = SandboxError::ResourceLimit {
            reason: "workspace over 1 GiB".to_string(),
        };
        assert!(err.to_string().contains("workspace over 1 GiB"));
    }

    #[test]
    fn test_tool_error_format_three_lines() {
        let err = ToolError::workspace("PATH_OUTSIDE_WORKSPACE", "path escapes: ../x");
        let rendered = err.format();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ERROR [PATH_OUTSIDE_WORKSPACE]");
        assert_eq!(lines[1], "Blocked by: workspace");
        assert_eq!(lines[2], "Message: path escapes: ../x");
    }

    #[test]
    fn test_tool_error_format_with_context() {
        let err = ToolError::runtime("TIMEOUT", "shell timed out")
            .with_context(serde_json::json!({"timeout_secs": 30}));
        let rendered = err.format();
        assert_eq!(rendered.lines().count(), 4);
        assert!(rendered.contains("Context: {\"timeout_secs\":30}"));
    }

    #[test]
    fn test_blocked_by_display() {
        assert_eq!(BlockedBy::Rules.to_string(), "rules");
        assert_eq!(BlockedBy::Workspace.to_string(), "workspace");
        assert_eq!(BlockedBy::Missing.to_string(), "missing");
        assert_eq!(BlockedBy::Runtime.to_string(), "runtime");
        assert_eq!(BlockedBy::Permission.to_string(), "permission");
    }

    #[test]
    fn test_sandbox_error_to_tool_error() {
        let err: ToolError = SandboxError::OutsideWorkspace {
            path: "x".to_string(),
        }
        .into();
        assert_eq!(err.blocked_by, BlockedBy::Workspace);
        assert_eq!(err.code, "PATH_OUTSIDE_WORKSPACE");

        let err: ToolError = SandboxError::NotADirectory {
            path: "x".to_string(),
        }
        .into();
        assert_eq!(err.blocked_by, BlockedBy::Missing);
        assert_eq!(err.code, "NOT_A_DIRECTORY");
    }

    #[test]
    fn test_patch_error_to_tool_error() {
        let err: ToolError = PatchError::MissingField {
            field: "title".to_string(),
        }
        .into();
        assert_eq!(err.blocked_by, BlockedBy::Rules);
        assert_eq!(err.code, "PATCH_MISSING_FIELDS");

        let err: ToolError = PatchError::NotFound {
            id: "20240101_000000_x".to_string(),
        }
        .into();
        assert_eq!(err.code, "PATCH_NOT_FOUND");
    }

    #[test]
    fn test_queue_error_to_tool_error() {
        let err: ToolError = QueueError::TaskNotFound {
            id: "task_0042".to_string(),
        }
        .into();
        assert_eq!(err.blocked_by, BlockedBy::Missing);
        assert_eq!(err.code, "TASK_NOT_FOUND");
    }

    #[test]
    fn test_store_error_to_tool_error() {
        let err: ToolError = StoreError::CorruptedIndex {
            reason: "id/row count mismatch".to_string(),
        }
        .into();
        assert_eq!(err.code, "CORRUPTED_INDEX");

        let err: ToolError = StoreError::EmbedFailed {
            reason: "gateway down".to_string(),
        }
        .into();
        assert_eq!(err.code, "EMBED_FAILED");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_subsystems() {
        let err: Error = SandboxError::NotFound {
            path: "x".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Sandbox(_)));

        let err: Error = StoreError::Serialization("bad json".to_string()).into();
        assert!(matches!(err, Error::Store(_)));

        let err: Error = GatewayError::Unavailable {
            reason: "connection refused".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Gateway(_)));
    }

    #[test]
    fn test_tool_error_serde_roundtrip() {
        let err = ToolError::missing("TOOL_NOT_FOUND", "no such tool: frobnicate");
        let json = serde_json::to_string(&err).unwrap();
        let back: ToolError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }
}
