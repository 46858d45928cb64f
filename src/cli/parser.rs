//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros. The binary is a
//! thin, non-interactive front-end over the engine's public operations.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default workspace directory, relative to the current directory.
pub const DEFAULT_WORKSPACE: &str = "workspace";

/// codeloom: local tool-using agent runtime over a code repository.
///
/// Indexes a project into citable chunks, proposes changes as reviewable
/// patch bundles, and drives a bounded reasoning loop against a model
/// gateway.
#[derive(Parser, Debug)]
#[command(name = "codeloom")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the workspace directory (all writes are confined here).
    #[arg(short, long, env = "CODELOOM_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the workspace layout and stores.
    Init,

    /// Show store, patch, and queue counters.
    Status,

    /// Ingest a file or directory into the retrieval stores.
    Ingest {
        /// Path to ingest, relative to the project root.
        path: PathBuf,
    },

    /// Hybrid search over indexed chunks.
    Search {
        /// Search query.
        query: String,

        /// Maximum results.
        #[arg(short, long, default_value = "8")]
        k: usize,

        /// Only chunks whose source path starts with this prefix.
        #[arg(long)]
        path_prefix: Option<String>,

        /// Only chunks whose source path ends with this suffix.
        #[arg(long)]
        file_type: Option<String>,
    },

    /// Explain a query: citation lines for the top hits.
    Explain {
        /// Search query.
        query: String,

        /// Maximum results.
        #[arg(short, long, default_value = "5")]
        k: usize,
    },

    /// Inspect patch bundles.
    #[command(subcommand)]
    Patch(PatchCommands),

    /// Operate the task queue.
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Run the agent loop with a scripted gateway replay file.
    Run {
        /// JSON file holding an array of scripted completions.
        #[arg(long)]
        script: PathBuf,

        /// User message to start the run with.
        message: String,

        /// Step budget for the run.
        #[arg(long, default_value = "20")]
        max_steps: usize,
    },
}

/// Patch subcommands.
#[derive(Subcommand, Debug)]
pub enum PatchCommands {
    /// List patch bundles, newest first.
    List {
        /// Only patches with this status.
        #[arg(long)]
        status: Option<String>,
    },

    /// Show a full patch bundle.
    Show {
        /// Patch identifier.
        patch_id: String,
    },

    /// Advance a patch's lifecycle status (operator-only; the agent never
    /// applies patches).
    SetStatus {
        /// Patch identifier.
        patch_id: String,

        /// New status (proposed, applied, tested, failed, rejected).
        status: String,
    },
}

/// Queue subcommands.
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Add a task.
    Add {
        /// Task objective.
        objective: String,

        /// Acceptance criteria.
        #[arg(long)]
        acceptance: Option<String>,

        /// Input references.
        #[arg(long)]
        input: Vec<String>,
    },

    /// List all tasks with statuses.
    List,

    /// Claim the earliest queued task.
    Next,

    /// Mark a task done.
    Done {
        /// Task identifier.
        task_id: String,
    },

    /// Mark a task failed.
    Fail {
        /// Task identifier.
        task_id: String,

        /// Failure description.
        error: String,
    },
}

impl Cli {
    /// Returns the workspace path, using the default if not specified.
    #[must_use]
    pub fn workspace_path(&self) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parse() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_workspace_path() {
        let cli = Cli {
            workspace: None,
            verbose: false,
            format: "text".to_string(),
            command: Commands::Status,
        };
        assert_eq!(cli.workspace_path(), PathBuf::from(DEFAULT_WORKSPACE));
    }

    #[test]
    fn test_custom_workspace_path() {
        let cli = Cli {
            workspace: Some(PathBuf::from("/custom/ws")),
            verbose: false,
            format: "text".to_string(),
            command: Commands::Status,
        };
        assert_eq!(cli.workspace_path(), PathBuf::from("/custom/ws"));
    }
}
