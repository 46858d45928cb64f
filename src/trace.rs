//! Per-run structured trace logging.
//!
//! Every run binds a [`TraceLogger`] that records tool lifecycle events
//! (CALL, RESULT with elapsed time, and run lifecycle markers). Events are
//! emitted as `tracing` events and retained in memory for post-run
//! inspection.

use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TraceEventKind {
    /// Run started.
    RunStart,
    /// Run finished (success or failure).
    RunEnd,
    /// Tool call dispatched.
    Call,
    /// Tool result observed.
    Result,
    /// Judge produced a non-info judgment.
    Judgment,
}

/// One structured trace event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Event kind.
    pub kind: TraceEventKind,
    /// Run this event belongs to.
    pub run_id: String,
    /// Tool name for CALL/RESULT events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    /// Tool call ID for CALL/RESULT events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Elapsed milliseconds for RESULT events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    /// Whether the call succeeded, for RESULT events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Free-form detail (final answer length, judgment text, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

impl TraceEvent {
    fn new(kind: TraceEventKind, run_id: &str) -> Self {
        Self {
            kind,
            run_id: run_id.to_string(),
            tool: None,
            tool_call_id: None,
            elapsed_ms: None,
            success: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }
}

/// Per-run trace logger.
///
/// Interior mutability keeps the call sites `&self`; the loop is
/// single-threaded, the mutex only satisfies `Sync`.
#[derive(Debug)]
pub struct TraceLogger {
    run_id: String,
    events: Mutex<Vec<TraceEvent>>,
}

impl TraceLogger {
    /// Creates a logger bound to a run and records the start marker.
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        let run_id = run_id.into();
        tracing::info!(target: "codeloom::trace", run_id = %run_id, "run start");
        let logger = Self {
            run_id: run_id.clone(),
            events: Mutex::new(Vec::new()),
        };
        logger.push(TraceEvent::new(TraceEventKind::RunStart, &run_id));
        logger
    }

    /// The bound run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Records a tool CALL and returns the timer to pass to
    /// [`TraceLogger::result`].
    #[must_use]
    pub fn call(&self, tool: &str, tool_call_id: &str) -> Instant {
        tracing::debug!(
            target: "codeloom::trace",
            run_id = %self.run_id,
            tool,
            tool_call_id,
            "tool call"
        );
        let mut event = TraceEvent::new(TraceEventKind::Call, &self.run_id);
        event.tool = Some(tool.to_string());
        event.tool_call_id = Some(tool_call_id.to_string());
        self.push(event);
        Instant::now()
    }

    /// Records a tool RESULT with elapsed time and success flag.
    pub fn result(&self, tool: &str, tool_call_id: &str, started: Instant, success: bool) {
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            target: "codeloom::trace",
            run_id = %self.run_id,
            tool,
            tool_call_id,
            elapsed_ms,
            success,
            "tool result"
        );
        let mut event = TraceEvent::new(TraceEventKind::Result, &self.run_id);
        event.tool = Some(tool.to_string());
        event.tool_call_id = Some(tool_call_id.to_string());
        event.elapsed_ms = Some(elapsed_ms);
        event.success = Some(success);
        self.push(event);
    }

    /// Records a non-info judgment.
    pub fn judgment(&self, detail: &str) {
        tracing::info!(
            target: "codeloom::trace",
            run_id = %self.run_id,
            detail,
            "judgment"
        );
        let mut event = TraceEvent::new(TraceEventKind::Judgment, &self.run_id);
        event.detail = Some(detail.to_string());
        self.push(event);
    }

    /// Records the run end marker.
    pub fn run_end(&self, success: bool, detail: &str) {
        tracing::info!(
            target: "codeloom::trace",
            run_id = %self.run_id,
            success,
            detail,
            "run end"
        );
        let mut event = TraceEvent::new(TraceEventKind::RunEnd, &self.run_id);
        event.success = Some(success);
        event.detail = Some(detail.to_string());
        self.push(event);
    }

    /// Snapshot of all recorded events, in order.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn push(&self, event: TraceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_start_recorded() {
        let logger = TraceLogger::new("run_test");
        let events = logger.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, TraceEventKind::RunStart);
        assert_eq!(events[0].run_id, "run_test");
    }

    #[test]
    fn test_call_result_pairing() {
        let logger = TraceLogger::new("run_test");
        let timer = logger.call("read_file", "call_1");
        logger.result("read_file", "call_1", timer, true);

        let events = logger.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].kind, TraceEventKind::Call);
        assert_eq!(events[1].tool.as_deref(), Some("read_file"));
        assert_eq!(events[2].kind, TraceEventKind::Result);
        assert_eq!(events[2].success, Some(true));
        assert!(events[2].elapsed_ms.is_some());
    }

    #[test]
    fn test_run_end_and_judgment() {
        let logger = TraceLogger::new("run_test");
        logger.judgment("loop detected");
        logger.run_end(true, "final answer: 42 chars");

        let events = logger.events();
        assert_eq!(events[1].kind, TraceEventKind::Judgment);
        assert_eq!(events[1].detail.as_deref(), Some("loop detected"));
        assert_eq!(events[2].kind, TraceEventKind::RunEnd);
        assert_eq!(events[2].success, Some(true));
    }
}
