//! Core domain types: messages, steps, execution state, identifiers.

pub mod context;
pub mod ids;
pub mod message;
pub mod step;

pub use context::{AgentState, ExecutionContext, LoopResult};
pub use message::{Conversation, Message, Role, ToolCall, ToolResult};
pub use step::{Step, StepType};
