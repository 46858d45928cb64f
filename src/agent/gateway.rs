//! Model gateway seam.
//!
//! The wire adapter to a hosted model backend lives outside this crate;
//! the loop only needs `complete`. [`ScriptedGateway`] is the
//! deterministic implementation used by tests and offline replay: it
//! returns queued completions in order.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::{Message, ToolCall};
use crate::error::GatewayError;
use crate::tools::ToolSpec;

/// One model completion: final text, tool calls, or both (text carried
/// alongside calls becomes the step's thought content).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    /// Assistant text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Requested tool calls, dispatched in declared order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    /// A final-text completion.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A tool-calling completion.
    #[must_use]
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    /// A tool-calling completion with accompanying thought text.
    #[must_use]
    pub fn thought_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls,
        }
    }

    /// Whether this completion ends the run.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// The model gateway capability consumed by the loop.
pub trait ModelGateway: Send + Sync {
    /// Produces the next completion for the conversation. The gateway is
    /// responsible for translating tool specs into its backend's shape and
    /// presenting tool-role messages with matching `tool_call_id`s.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`]; the loop retries transient failures and
    /// aborts the run when they persist.
    fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> std::result::Result<Completion, GatewayError>;
}

/// Deterministic gateway returning queued completions in order.
///
/// Used by tests and the CLI's offline replay mode. An exhausted script
/// yields a terminal apology rather than an error, so replay transcripts
/// do not have to count steps exactly.
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Completion>>,
}

impl ScriptedGateway {
    /// Creates a gateway that will replay the given completions.
    #[must_use]
    pub fn new(completions: Vec<Completion>) -> Self {
        Self {
            script: Mutex::new(completions.into()),
        }
    }

    /// Remaining scripted completions.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl ModelGateway for ScriptedGateway {
    fn complete(
        &self,
        _messages: &[Message],
        _tools: &[ToolSpec],
    ) -> std::result::Result<Completion, GatewayError> {
        let mut script = self.script.lock().map_err(|_| GatewayError::Unavailable {
            reason: "script lock poisoned".to_string(),
        })?;
        Ok(script
            .pop_front()
            .unwrap_or_else(|| Completion::text("script exhausted; ending the run")))
    }
}
