//! Agent orchestration: gateway seam, engine, prompt composition, and the
//! step-bounded loop.

pub mod engine;
pub mod gateway;
pub mod prompt;
pub mod runner;

pub use engine::{Engine, EngineConfig, EngineStatus};
pub use gateway::{Completion, ModelGateway, ScriptedGateway};
pub use runner::AgentLoop;
