//! Shell tool: command execution with a timeout and a fixed forbidden
//! pattern set checked before dispatch.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::{Tool, ToolOutcome, parse_args, schema};
use crate::error::ToolError;
use crate::sandbox::Sandbox;

/// Default command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval while waiting for the child.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Output cap per stream.
const MAX_STREAM_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct ShellParams {
    command: String,
    #[serde(default)]
    cwd: Option<String>,
}

/// Executes a shell command under the workspace with a timeout.
pub struct ShellTool {
    sandbox: Arc<Sandbox>,
    timeout: Duration,
}

impl ShellTool {
    /// Creates the tool with the default timeout.
    #[must_use]
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self {
            sandbox,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Fixed forbidden patterns checked before dispatch: whole-filesystem
/// deletes, raw disk writes, credential-file reads, fork bombs.
fn forbidden_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"rm\s+(-[a-zA-Z]+\s+)*(/|~)(\s|$)",
            r"\bmkfs(\.[a-z0-9]+)?\b",
            r"\bdd\b.*\bof=/dev/",
            r">\s*/dev/sd[a-z]",
            r"/etc/shadow",
            r"\.ssh/id_[a-z0-9]+",
            r"\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    })
}

impl Tool for ShellTool {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn description(&self) -> &'static str {
        "Run a shell command in the workspace with a timeout. Destructive patterns are refused"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[
                ("command", schema::string("Command line passed to sh -c")),
                ("cwd", schema::string("Working directory relative to the workspace root")),
            ],
            &["command"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: ShellParams = parse_args(arguments)?;

        if let Some(pattern) = forbidden_patterns()
            .iter()
            .find(|p| p.is_match(&params.command))
        {
            return Err(ToolError::rules(
                "RULE_VIOLATION",
                format!("command matches forbidden pattern: {}", pattern.as_str()),
            ));
        }

        let cwd = match &params.cwd {
            Some(dir) => self.sandbox.resolve(dir)?,
            None => self.sandbox.workspace_root().to_path_buf(),
        };
        if !cwd.is_dir() {
            return Err(ToolError::runtime(
                "SHELL_FAILED",
                format!("working directory does not exist: {}", cwd.display()),
            ));
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&params.command)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::runtime("SHELL_FAILED", e.to_string()))?;

        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if started.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ToolError::runtime(
                            "TIMEOUT",
                            format!(
                                "command exceeded {} s timeout",
                                self.timeout.as_secs()
                            ),
                        )
                        .with_context(serde_json::json!({
                            "timeout_secs": self.timeout.as_secs(),
                        })));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(ToolError::runtime("SHELL_FAILED", e.to_string()));
                }
            }
        };

        let stdout = join_reader(stdout_reader);
        let stderr = join_reader(stderr_reader);
        let mut output = String::new();
        if !stdout.is_empty() {
            output.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !output.is_empty() {
                output.push('\n');
            }
            output.push_str("stderr:\n");
            output.push_str(&stderr);
        }

        if status.success() {
            if output.is_empty() {
                output.push_str("(no output)");
            }
            Ok(output)
        } else {
            let code = status.code().map_or_else(|| "signal".to_string(), |c| c.to_string());
            Err(ToolError::runtime(
                "COMMAND_FAILED",
                format!("exit {code}\n{output}"),
            ))
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
) -> Option<std::thread::JoinHandle<String>> {
    source.map(|mut reader| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader
                .by_ref()
                .take(MAX_STREAM_BYTES as u64)
                .read_to_end(&mut buf);
            // Drain the remainder so the child never blocks on a full pipe.
            let _ = std::io::copy(&mut reader, &mut std::io::sink());
            String::from_utf8_lossy(&buf).to_string()
        })
    })
}

fn join_reader(handle: Option<std::thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn tool() -> (TempDir, ShellTool) {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("project").join("workspace");
        let sandbox = Arc::new(Sandbox::new(&ws, SandboxConfig::default()).unwrap());
        (tmp, ShellTool::new(sandbox))
    }

    #[test]
    fn test_runs_command_and_captures_stdout() {
        let (_tmp, tool) = tool();
        let out = tool.execute(&json!({"command": "echo hello"})).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_nonzero_exit_is_failure_with_output() {
        let (_tmp, tool) = tool();
        let err = tool
            .execute(&json!({"command": "echo oops >&2; exit 3"}))
            .unwrap_err();
        assert_eq!(err.code, "COMMAND_FAILED");
        assert!(err.message.contains("exit 3"));
        assert!(err.message.contains("oops"));
    }

    #[test]
    fn test_forbidden_patterns_blocked() {
        let (_tmp, tool) = tool();
        for bad in [
            "rm -rf /",
            "mkfs.ext4 /dev/sda1",
            "dd if=/dev/zero of=/dev/sda",
            "cat /etc/shadow",
        ] {
            let err = tool.execute(&json!({"command": bad})).unwrap_err();
            assert_eq!(err.code, "RULE_VIOLATION", "{bad}");
        }
    }

    #[test]
    fn test_timeout_kills_child() {
        let (_tmp, tool) = tool();
        let tool = tool.with_timeout(Duration::from_millis(200));
        let started = Instant::now();
        let err = tool.execute(&json!({"command": "sleep 5"})).unwrap_err();
        assert_eq!(err.code, "TIMEOUT");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_cwd_resolved_in_workspace() {
        let (_tmp, tool) = tool();
        std::fs::create_dir_all(tool.sandbox.workspace_root().join("sub")).unwrap();
        let out = tool
            .execute(&json!({"command": "pwd", "cwd": "sub"}))
            .unwrap();
        assert!(out.trim().ends_with("/sub"));
    }

    #[test]
    fn test_cwd_escape_blocked() {
        let (_tmp, tool) = tool();
        let err = tool
            .execute(&json!({"command": "pwd", "cwd": "../.."}))
            .unwrap_err();
        assert_eq!(err.code, "PATH_OUTSIDE_WORKSPACE");
    }

    #[test]
    fn test_runs_in_workspace_by_default() {
        let (_tmp, tool) = tool();
        let out = tool.execute(&json!({"command": "pwd"})).unwrap();
        assert!(out.trim().ends_with("/workspace"));
    }
}
