//! Filesystem tools: `list_files`, `read_file`, `write_file`.
//!
//! Reads may target the workspace or (read-only) the enclosing project;
//! writes are confined to the workspace and preceded by the resource
//! circuit breaker.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::{Tool, ToolOutcome, parse_args, schema};
use crate::error::{SandboxError, ToolError};
use crate::sandbox::Sandbox;
use crate::store::write_atomic;

/// Maximum bytes `read_file` returns.
pub const MAX_READ_BYTES: u64 = 256 * 1024;

#[derive(Debug, Deserialize)]
struct PathParams {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    path: String,
    content: String,
}

/// Resolves a read path: workspace first, then the read-only project view.
fn resolve_for_read(sandbox: &Sandbox, path: &str) -> std::result::Result<PathBuf, ToolError> {
    match sandbox.resolve_read(path) {
        Ok(resolved) if resolved.exists() => return Ok(resolved),
        Ok(_) => {}
        Err(err @ SandboxError::BlockedPath { .. }) => return Err(err.into()),
        Err(_) => {}
    }
    sandbox.resolve_project_read(path).map_err(ToolError::from)
}

/// Directory listing of a workspace or project-read path.
pub struct ListFilesTool {
    sandbox: Arc<Sandbox>,
}

impl ListFilesTool {
    /// Creates the tool over a sandbox handle.
    #[must_use]
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

impl Tool for ListFilesTool {
    fn name(&self) -> &'static str {
        "list_files"
    }

    fn description(&self) -> &'static str {
        "List the entries of a directory in the workspace or project (read-only)"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[("path", schema::string("Directory to list, relative to the workspace or project root"))],
            &["path"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: PathParams = parse_args(arguments)?;
        let resolved = resolve_for_read(&self.sandbox, &params.path)?;
        if !resolved.is_dir() {
            return Err(SandboxError::NotADirectory {
                path: params.path,
            }
            .into());
        }

        let mut entries: Vec<String> = std::fs::read_dir(&resolved)
            .map_err(|e| ToolError::runtime("LIST_FAILED", e.to_string()))?
            .filter_map(std::result::Result::ok)
            .map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if entry.file_type().is_ok_and(|t| t.is_dir()) {
                    format!("{name}/")
                } else {
                    name
                }
            })
            .collect();
        entries.sort();

        if entries.is_empty() {
            Ok(format!("{} is empty", params.path))
        } else {
            Ok(entries.join("\n"))
        }
    }
}

/// Size-capped file read from the workspace or project.
pub struct ReadFileTool {
    sandbox: Arc<Sandbox>,
    max_bytes: u64,
}

impl ReadFileTool {
    /// Creates the tool with the default size cap.
    #[must_use]
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self {
            sandbox,
            max_bytes: MAX_READ_BYTES,
        }
    }

    /// Overrides the size cap.
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

impl Tool for ReadFileTool {
    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read a UTF-8 file from the workspace or project (read-only), up to a size cap"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[("path", schema::string("File to read, relative to the workspace or project root"))],
            &["path"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: PathParams = parse_args(arguments)?;
        let resolved = resolve_for_read(&self.sandbox, &params.path)?;
        if !resolved.is_file() {
            return Err(SandboxError::NotAFile { path: params.path }.into());
        }

        let size = std::fs::metadata(&resolved)
            .map_err(|e| ToolError::runtime("READ_FAILED", e.to_string()))?
            .len();
        if size > self.max_bytes {
            return Err(ToolError::runtime(
                "FILE_TOO_LARGE",
                format!(
                    "{} is {size} bytes, cap is {} bytes",
                    params.path, self.max_bytes
                ),
            ));
        }

        let bytes = std::fs::read(&resolved)
            .map_err(|e| ToolError::runtime("READ_FAILED", e.to_string()))?;
        String::from_utf8(bytes).map_err(|_| {
            ToolError::runtime(
                "INVALID_ENCODING",
                format!("{} is not valid UTF-8", params.path),
            )
        })
    }
}

/// Workspace-confined file write, gated by the resource circuit breaker.
pub struct WriteFileTool {
    sandbox: Arc<Sandbox>,
}

impl WriteFileTool {
    /// Creates the tool over a sandbox handle.
    #[must_use]
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Create or overwrite a file under the workspace. Project files change only through patches"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[
                ("path", schema::string("Target path, relative to the workspace root")),
                ("content", schema::string("Full file contents")),
            ],
            &["path", "content"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: WriteParams = parse_args(arguments)?;
        self.sandbox.check_resources()?;
        let resolved = self.sandbox.resolve(&params.path)?;

        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ToolError::runtime("WRITE_FAILED", e.to_string()))?;
        }
        write_atomic(&resolved, params.content.as_bytes())
            .map_err(|e| ToolError::runtime("WRITE_FAILED", e.to_string()))?;
        Ok(format!(
            "wrote {} bytes to {}",
            params.content.len(),
            params.path
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, Arc<Sandbox>) {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("project").join("workspace");
        let sandbox = Arc::new(Sandbox::new(&ws, SandboxConfig::default()).unwrap());
        (tmp, sandbox)
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let (_tmp, sandbox) = sandbox();
        let write = WriteFileTool::new(Arc::clone(&sandbox));
        let read = ReadFileTool::new(Arc::clone(&sandbox));

        let out = write
            .execute(&json!({"path": "notes/a.txt", "content": "hello"}))
            .unwrap();
        assert!(out.contains("5 bytes"));

        let content = read.execute(&json!({"path": "notes/a.txt"})).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_write_outside_workspace_blocked() {
        let (_tmp, sandbox) = sandbox();
        let write = WriteFileTool::new(sandbox);
        let err = write
            .execute(&json!({"path": "../core/state.py", "content": "x"}))
            .unwrap_err();
        assert_eq!(err.code, "PATH_OUTSIDE_WORKSPACE");
    }

    #[test]
    fn test_read_project_file() {
        let (_tmp, sandbox) = sandbox();
        std::fs::write(sandbox.project_root().join("readme.txt"), "project doc").unwrap();
        let read = ReadFileTool::new(sandbox);
        let content = read.execute(&json!({"path": "readme.txt"})).unwrap();
        assert_eq!(content, "project doc");
    }

    #[test]
    fn test_read_missing_file() {
        let (_tmp, sandbox) = sandbox();
        let read = ReadFileTool::new(sandbox);
        let err = read.execute(&json!({"path": "missing.txt"})).unwrap_err();
        assert_eq!(err.code, "FILE_NOT_FOUND");
    }

    #[test]
    fn test_read_size_cap_boundary() {
        let (_tmp, sandbox) = sandbox();
        let write = WriteFileTool::new(Arc::clone(&sandbox));
        let read = ReadFileTool::new(Arc::clone(&sandbox)).with_max_bytes(8);

        write
            .execute(&json!({"path": "exact.txt", "content": "12345678"}))
            .unwrap();
        assert_eq!(read.execute(&json!({"path": "exact.txt"})).unwrap(), "12345678");

        write
            .execute(&json!({"path": "over.txt", "content": "123456789"}))
            .unwrap();
        let err = read.execute(&json!({"path": "over.txt"})).unwrap_err();
        assert_eq!(err.code, "FILE_TOO_LARGE");
    }

    #[test]
    fn test_read_invalid_utf8() {
        let (_tmp, sandbox) = sandbox();
        std::fs::write(sandbox.workspace_root().join("bin.dat"), [0xff, 0xfe, 0x00]).unwrap();
        let read = ReadFileTool::new(sandbox);
        let err = read.execute(&json!({"path": "bin.dat"})).unwrap_err();
        assert_eq!(err.code, "INVALID_ENCODING");
    }

    #[test]
    fn test_list_files() {
        let (_tmp, sandbox) = sandbox();
        std::fs::write(sandbox.workspace_root().join("b.txt"), "b").unwrap();
        std::fs::create_dir_all(sandbox.workspace_root().join("sub")).unwrap();
        let list = ListFilesTool::new(sandbox);

        let out = list.execute(&json!({"path": "."})).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines.contains(&"b.txt"));
        assert!(lines.contains(&"sub/"));
    }

    #[test]
    fn test_list_not_a_directory() {
        let (_tmp, sandbox) = sandbox();
        std::fs::write(sandbox.workspace_root().join("f.txt"), "x").unwrap();
        let list = ListFilesTool::new(sandbox);
        let err = list.execute(&json!({"path": "f.txt"})).unwrap_err();
        assert_eq!(err.code, "NOT_A_DIRECTORY");
    }

    #[test]
    fn test_read_blocked_sensitive_path() {
        let (_tmp, sandbox) = sandbox();
        std::fs::write(sandbox.project_root().join(".env"), "KEY=1").unwrap();
        let read = ReadFileTool::new(sandbox);
        let err = read.execute(&json!({"path": ".env"})).unwrap_err();
        assert_eq!(err.code, "BLOCKED_PATH");
    }
}
