//! Persistent subprocess evaluator with length-prefixed framing.
//!
//! The tool keeps one long-lived interpreter child per session. Requests
//! and responses are framed identically on stdin and stdout: a 32-bit
//! big-endian byte count followed by that many bytes of JSON. Framing
//! removes every boundary ambiguity a line protocol would have with
//! multi-line code and output.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Tool, ToolOutcome, parse_args, schema};
use crate::error::ToolError;

/// Maximum accepted response frame.
const MAX_FRAME_BYTES: u32 = 4 * 1024 * 1024;

/// Python worker: reads frames, evaluates code in one persistent global
/// namespace, writes response frames.
const PYTHON_WORKER: &str = r#"
import contextlib, io, json, struct, sys, traceback
session = {}
while True:
    header = sys.stdin.buffer.read(4)
    if len(header) < 4:
        break
    (length,) = struct.unpack(">I", header)
    request = json.loads(sys.stdin.buffer.read(length).decode("utf-8"))
    out = io.StringIO()
    response = {}
    try:
        with contextlib.redirect_stdout(out):
            try:
                value = eval(compile(request["code"], "<session>", "eval"), session)
                if value is not None:
                    print(repr(value))
            except SyntaxError:
                exec(compile(request["code"], "<session>", "exec"), session)
        response["output"] = out.getvalue()
    except BaseException:
        response["error"] = traceback.format_exc()
    payload = json.dumps(response).encode("utf-8")
    sys.stdout.buffer.write(struct.pack(">I", len(payload)))
    sys.stdout.buffer.write(payload)
    sys.stdout.buffer.flush()
"#;

#[derive(Debug, Deserialize)]
struct SubprocessParams {
    code: String,
    #[serde(default)]
    reset: bool,
}

#[derive(Debug, Serialize)]
struct FrameRequest<'a> {
    code: &'a str,
}

#[derive(Debug, Deserialize)]
struct FrameResponse {
    #[serde(default)]
    output: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

struct Session {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Long-lived code evaluation sessions over a framed pipe protocol.
pub struct SubprocessTool {
    program: String,
    args: Vec<String>,
    session: Mutex<Option<Session>>,
}

impl Default for SubprocessTool {
    fn default() -> Self {
        Self::new(
            "python3",
            &["-u".to_string(), "-c".to_string(), PYTHON_WORKER.to_string()],
        )
    }
}

impl SubprocessTool {
    /// Creates the tool with an explicit interpreter command.
    #[must_use]
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
            session: Mutex::new(None),
        }
    }

    fn spawn_session(&self) -> std::result::Result<Session, ToolError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                ToolError::runtime(
                    "SUBPROCESS_SPAWN",
                    format!("failed to start {}: {e}", self.program),
                )
            })?;
        let stdin = child.stdin.take().ok_or_else(|| {
            ToolError::runtime("SUBPROCESS_SPAWN", "child stdin unavailable")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ToolError::runtime("SUBPROCESS_SPAWN", "child stdout unavailable")
        })?;
        Ok(Session {
            child,
            stdin,
            stdout,
        })
    }

    fn roundtrip(session: &mut Session, code: &str) -> std::result::Result<FrameResponse, ToolError> {
        let payload = serde_json::to_vec(&FrameRequest { code })
            .map_err(|e| ToolError::runtime("SUBPROCESS_IO", e.to_string()))?;
        let len = u32::try_from(payload.len())
            .map_err(|_| ToolError::runtime("SUBPROCESS_IO", "request too large"))?;

        session
            .stdin
            .write_all(&len.to_be_bytes())
            .and_then(|()| session.stdin.write_all(&payload))
            .and_then(|()| session.stdin.flush())
            .map_err(|e| ToolError::runtime("SUBPROCESS_IO", format!("write failed: {e}")))?;

        let mut header = [0u8; 4];
        session
            .stdout
            .read_exact(&mut header)
            .map_err(|e| ToolError::runtime("SUBPROCESS_IO", format!("read failed: {e}")))?;
        let length = u32::from_be_bytes(header);
        if length > MAX_FRAME_BYTES {
            return Err(ToolError::runtime(
                "SUBPROCESS_IO",
                format!("response frame of {length} bytes exceeds the cap"),
            ));
        }
        let mut body = vec![0u8; length as usize];
        session
            .stdout
            .read_exact(&mut body)
            .map_err(|e| ToolError::runtime("SUBPROCESS_IO", format!("read failed: {e}")))?;
        serde_json::from_slice(&body)
            .map_err(|e| ToolError::runtime("SUBPROCESS_IO", format!("bad frame: {e}")))
    }
}

impl Tool for SubprocessTool {
    fn name(&self) -> &'static str {
        "subprocess_exec"
    }

    fn description(&self) -> &'static str {
        "Evaluate code in a persistent interpreter session; state survives between calls"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[
                ("code", schema::string("Code to evaluate in the session")),
                ("reset", schema::boolean("Discard the session and start fresh first")),
            ],
            &["code"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: SubprocessParams = parse_args(arguments)?;
        let mut guard = self
            .session
            .lock()
            .map_err(|_| ToolError::runtime("SUBPROCESS_IO", "session lock poisoned"))?;

        if params.reset {
            *guard = None;
        }
        if guard.is_none() {
            *guard = Some(self.spawn_session()?);
        }
        let session = guard.as_mut().ok_or_else(|| {
            ToolError::runtime("SUBPROCESS_SPAWN", "session unavailable")
        })?;

        match Self::roundtrip(session, &params.code) {
            Ok(FrameResponse {
                error: Some(error), ..
            }) => Err(ToolError::runtime("SUBPROCESS_EVAL", error)),
            Ok(FrameResponse { output, .. }) => {
                let output = output.unwrap_or_default();
                if output.is_empty() {
                    Ok("(no output)".to_string())
                } else {
                    Ok(output)
                }
            }
            Err(err) => {
                // A broken pipe means the child died; drop the session so
                // the next call starts fresh.
                *guard = None;
                Err(err)
            }
        }
    }
}
