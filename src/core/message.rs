//! Conversation message shapes.
//!
//! Messages, tool calls, and tool results are the wire-level vocabulary
//! between the loop, the model gateway, and the tools. A conversation is an
//! insertion-ordered sequence of messages.

use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (prompt, judge notes).
    System,
    /// End-user input.
    User,
    /// Model output (final text or tool requests).
    Assistant,
    /// Tool result, paired to a call by `tool_call_id`.
    Tool,
}

/// A single model-requested tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier, unique within a run.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Structured arguments (validated against the tool schema before
    /// dispatch).
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a tool call with a fresh opaque ID.
    #[must_use]
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: super::ids::tool_call_id(),
            name: name.into(),
            arguments,
        }
    }

    /// Creates a tool call with an explicit ID (gateway-assigned).
    #[must_use]
    pub fn with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Result of one tool invocation.
///
/// Exactly one of a successful `output` or a non-empty `error` is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the originating [`ToolCall`].
    pub tool_call_id: String,
    /// Tool output text (empty on failure).
    pub output: String,
    /// Formatted [`ToolError`] block (absent on success).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the call succeeded.
    pub success: bool,
}

impl ToolResult {
    /// Creates a success result.
    #[must_use]
    pub fn success(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: output.into(),
            error: None,
            success: true,
        }
    }

    /// Creates a failure result from a structured tool error.
    #[must_use]
    pub fn failure(tool_call_id: impl Into<String>, error: &ToolError) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            output: String::new(),
            error: Some(error.format()),
            success: false,
        }
    }

    /// Text the model observes: the output on success, the formatted error
    /// block on failure.
    #[must_use]
    pub fn observed_text(&self) -> &str {
        if self.success {
            &self.output
        } else {
            self.error.as_deref().unwrap_or("")
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message role.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Tool` messages: the call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Creates an assistant message with optional tool calls.
    #[must_use]
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Creates a tool message carrying a result, paired by call ID.
    #[must_use]
    pub fn tool(result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.observed_text().to_string(),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.tool_call_id.clone()),
        }
    }
}

/// An insertion-ordered conversation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    /// Opaque conversation identifier (`conv_` prefix).
    pub id: String,
    /// Messages in insertion order.
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Creates an empty conversation with a fresh ID.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: super::ids::conversation_id(),
            messages: Vec::new(),
        }
    }

    /// Appends a message, preserving insertion order.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
