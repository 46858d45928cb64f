//! # codeloom
//!
//! A local, tool-using agent runtime: a bounded reasoning loop that drives
//! a language-model gateway through interleaved thinking and tool
//! invocation, accumulating durable, citable memory over a code
//! repository.
//!
//! ## Subsystems
//!
//! - **Sandbox**: writes confined to a workspace root, read-only project
//!   access, sensitive-pattern blocking, resource circuit breaker
//! - **Retrieval**: deterministic chunker, inverted keyword index, vector
//!   store with atomic persistence and self-healing, hybrid rank-fused
//!   search
//! - **Patch protocol**: every project-source mutation flows through a
//!   reviewable patch bundle; the agent never applies patches itself
//! - **Task queue**: append-only task log with markdown checkpoints so
//!   long work survives context exhaustion
//! - **Agent loop**: step- and tool-budgeted orchestration with safety
//!   rules, structured tracing, and an advisory workflow judge

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod agent;
pub mod cli;
pub mod core;
pub mod embedding;
pub mod error;
pub mod judge;
pub mod patch;
pub mod queue;
pub mod retrieval;
pub mod rules;
pub mod sandbox;
pub mod store;
pub mod tools;
pub mod trace;

// Re-export commonly used types at crate root
pub use error::{BlockedBy, Error, Result, ToolError};

// Re-export core domain types
pub use crate::core::{
    AgentState, Conversation, ExecutionContext, LoopResult, Message, Role, Step, StepType,
    ToolCall, ToolResult,
};

// Re-export the engine surface
pub use agent::{AgentLoop, Completion, Engine, EngineConfig, ModelGateway, ScriptedGateway};

// Re-export sandbox types
pub use sandbox::{Sandbox, SandboxConfig};

// Re-export retrieval types
pub use retrieval::{VectorGit, VectorGitConfig};

// Re-export store types
pub use store::{ChunkManifest, ChunkType, SearchFilters, SearchHit, VectorStore};

// Re-export embedding types
pub use embedding::{DEFAULT_DIMENSIONS, EmbeddingGateway, HashEmbedder, cosine_similarity};

// Re-export patch and queue types
pub use patch::{PatchManager, PatchStatus};
pub use queue::{Checkpoint, TaskPacket, TaskQueue, TaskStatus};
