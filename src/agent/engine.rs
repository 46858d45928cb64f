//! The engine: single owner of the long-lived stores.
//!
//! Sandbox, retrieval façade, patch manager, and task queue live as long
//! as the process and are owned here. Tools hold `Arc` handles obtained at
//! construction; nothing is a global. Each run's `ExecutionContext`
//! references the engine but owns only per-run state.

use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingGateway;
use crate::error::{Error, Result};
use crate::judge::{Judge, JudgeConfig};
use crate::patch::{PatchManager, PatchStatus};
use crate::queue::{TaskQueue, TaskStatus};
use crate::retrieval::{IngestReport, VectorGit, VectorGitConfig};
use crate::rules::RuleEngine;
use crate::sandbox::{PATCHES_DIR, QUEUE_DIR, STORE_DIR, Sandbox, SandboxConfig};
use crate::tools::{
    ToolRegistry, data_view::DataViewTool, fetch::FetchTool, files::ListFilesTool,
    files::ReadFileTool, files::WriteFileTool, patch_tools::CreatePatchTool,
    patch_tools::GetPatchTool, patch_tools::ListPatchesTool, queue_tools::QueueAddTool,
    queue_tools::QueueDoneTool, queue_tools::QueueFailTool, queue_tools::QueueNextTool,
    retrieval::SearchChunksTool, shell::ShellTool, subprocess::SubprocessTool,
};

/// Engine configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Sandbox resource limits.
    pub sandbox: SandboxConfig,
    /// Retrieval façade configuration.
    pub retrieval: VectorGitConfig,
    /// Judge configuration.
    pub judge: JudgeConfig,
}

/// Counters reported by [`Engine::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Chunks in the manifest.
    pub chunks: usize,
    /// Vectors in the store.
    pub vectors: usize,
    /// Whether the inverted index awaits a rebuild.
    pub index_dirty: bool,
    /// Patch bundles by lifecycle stage: proposed count first.
    pub patches_proposed: usize,
    /// Total patch bundles.
    pub patches_total: usize,
    /// Queued tasks.
    pub tasks_queued: usize,
    /// Running tasks.
    pub tasks_running: usize,
    /// Terminal tasks (done + failed).
    pub tasks_terminal: usize,
    /// Workspace size in bytes.
    pub workspace_size_bytes: u64,
}

/// Single owner of the shared stores, wired into a tool registry.
pub struct Engine {
    sandbox: Arc<Sandbox>,
    rules: Arc<RuleEngine>,
    judge: Judge,
    registry: Arc<ToolRegistry>,
    vectorgit: Arc<RwLock<VectorGit>>,
    patches: Arc<PatchManager>,
    queue: Arc<Mutex<TaskQueue>>,
}

impl Engine {
    /// Opens an engine with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when any store fails to initialize.
    pub fn open(
        workspace_root: impl AsRef<Path>,
        embedder: Option<Arc<dyn EmbeddingGateway>>,
    ) -> Result<Self> {
        Self::open_with(workspace_root, embedder, EngineConfig::default())
    }

    /// Opens an engine with explicit configuration, creating the workspace
    /// layout and loading (or healing) persisted state.
    ///
    /// # Errors
    ///
    /// Returns an error when any store fails to initialize.
    pub fn open_with(
        workspace_root: impl AsRef<Path>,
        embedder: Option<Arc<dyn EmbeddingGateway>>,
        config: EngineConfig,
    ) -> Result<Self> {
        let sandbox = Arc::new(Sandbox::new(workspace_root, config.sandbox)?);
        let mut retrieval_config = config.retrieval;
        // The workspace must never ingest itself, whatever it is named.
        if let Some(name) = sandbox.workspace_root().file_name() {
            retrieval_config
                .ignore_dirs
                .insert(name.to_string_lossy().to_string());
        }
        let vectorgit = Arc::new(RwLock::new(VectorGit::open(
            sandbox.workspace_root().join(STORE_DIR),
            embedder,
            retrieval_config,
        )?));
        let patches = Arc::new(PatchManager::new(
            sandbox.workspace_root().join(PATCHES_DIR),
        ));
        let queue = Arc::new(Mutex::new(TaskQueue::open(
            sandbox.workspace_root().join(QUEUE_DIR),
        )?));

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(ListFilesTool::new(Arc::clone(&sandbox))))?;
        registry.register(Arc::new(ReadFileTool::new(Arc::clone(&sandbox))))?;
        registry.register(Arc::new(WriteFileTool::new(Arc::clone(&sandbox))))?;
        registry.register(Arc::new(ShellTool::new(Arc::clone(&sandbox))))?;
        registry.register(Arc::new(FetchTool::default()))?;
        registry.register(Arc::new(DataViewTool::new(Arc::clone(&sandbox))))?;
        registry.register(Arc::new(SubprocessTool::default()))?;
        registry.register(Arc::new(SearchChunksTool::new(Arc::clone(&vectorgit))))?;
        registry.register(Arc::new(CreatePatchTool::new(Arc::clone(&patches))))?;
        registry.register(Arc::new(ListPatchesTool::new(Arc::clone(&patches))))?;
        registry.register(Arc::new(GetPatchTool::new(Arc::clone(&patches))))?;
        registry.register(Arc::new(QueueAddTool::new(Arc::clone(&queue))))?;
        registry.register(Arc::new(QueueNextTool::new(Arc::clone(&queue))))?;
        registry.register(Arc::new(QueueDoneTool::new(Arc::clone(&queue))))?;
        registry.register(Arc::new(QueueFailTool::new(Arc::clone(&queue))))?;

        Ok(Self {
            sandbox,
            rules: Arc::new(RuleEngine::with_defaults()),
            judge: Judge::new(config.judge),
            registry: Arc::new(registry),
            vectorgit,
            patches,
            queue,
        })
    }

    /// The sandbox handle.
    #[must_use]
    pub fn sandbox(&self) -> &Arc<Sandbox> {
        &self.sandbox
    }

    /// The safety rule engine.
    #[must_use]
    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    /// The workflow judge.
    #[must_use]
    pub const fn judge(&self) -> &Judge {
        &self.judge
    }

    /// The tool registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// The retrieval façade.
    #[must_use]
    pub fn vectorgit(&self) -> &Arc<RwLock<VectorGit>> {
        &self.vectorgit
    }

    /// The patch manager.
    #[must_use]
    pub fn patches(&self) -> &Arc<PatchManager> {
        &self.patches
    }

    /// The task queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<Mutex<TaskQueue>> {
        &self.queue
    }

    /// Ingests a project path into the retrieval stores. Paths are
    /// recorded relative to the project root; the resource circuit breaker
    /// runs first.
    ///
    /// # Errors
    ///
    /// Returns an error on resource exhaustion or persistence failure.
    pub fn ingest(&self, target: impl AsRef<Path>) -> Result<IngestReport> {
        self.sandbox.check_resources()?;
        let target = target.as_ref();
        let resolved = if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.sandbox.project_root().join(target)
        };
        let mut git = self.vectorgit.write().map_err(|_| Error::InvalidState {
            message: "retrieval lock poisoned".to_string(),
        })?;
        let project_root = self.sandbox.project_root().to_path_buf();
        Ok(git.ingest_path(&project_root, &resolved)?)
    }

    /// Snapshot of store counters.
    ///
    /// # Errors
    ///
    /// Returns an error when a store lock is poisoned or patches are
    /// unreadable.
    pub fn status(&self) -> Result<EngineStatus> {
        let git = self.vectorgit.read().map_err(|_| Error::InvalidState {
            message: "retrieval lock poisoned".to_string(),
        })?;
        let queue = self.queue.lock().map_err(|_| Error::InvalidState {
            message: "queue lock poisoned".to_string(),
        })?;
        let patches = self.patches.list(None)?;
        let proposed = patches
            .iter()
            .filter(|p| p.status == PatchStatus::Proposed)
            .count();
        let count_status =
            |status: TaskStatus| queue.list().iter().filter(|t| t.status == status).count();

        Ok(EngineStatus {
            chunks: git.chunk_count(),
            vectors: git.vector_count(),
            index_dirty: git.is_index_dirty(),
            patches_proposed: proposed,
            patches_total: patches.len(),
            tasks_queued: count_status(TaskStatus::Queued),
            tasks_running: count_status(TaskStatus::Running),
            tasks_terminal: count_status(TaskStatus::Done) + count_status(TaskStatus::Failed),
            workspace_size_bytes: self.sandbox.workspace_size_bytes(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;

    fn engine() -> (TempDir, Engine) {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("project").join("workspace");
        let engine = Engine::open(&ws, Some(Arc::new(HashEmbedder::default()))).unwrap();
        (tmp, engine)
    }

    #[test]
    fn test_open_registers_builtin_tools() {
        let (_tmp, engine) = engine();
        let names = engine.registry().names();
        for expected in [
            "list_files",
            "read_file",
            "write_file",
            "shell",
            "fetch",
            "data_view",
            "subprocess_exec",
            "search_chunks",
            "create_patch",
            "list_patches",
            "get_patch",
            "queue_add",
            "queue_next",
            "queue_done",
            "queue_fail",
        ] {
            assert!(names.contains(&expected.to_string()), "{expected}");
        }
    }

    #[test]
    fn test_ingest_records_project_relative_paths() {
        let (_tmp, engine) = engine();
        std::fs::write(
            engine.sandbox().project_root().join("util.py"),
            "def helper():\n    return 1\n",
        )
        .unwrap();

        let report = engine.ingest(".").unwrap();
        assert_eq!(report.files_ingested, 1);

        let status = engine.status().unwrap();
        assert_eq!(status.chunks, 1);
        assert_eq!(status.vectors, 1);
    }

    #[test]
    fn test_status_counts_queue_and_patches() {
        let (_tmp, engine) = engine();
        engine
            .queue()
            .lock()
            .unwrap()
            .add_task(crate::queue::NewTask {
                objective: "x".to_string(),
                ..Default::default()
            })
            .unwrap();

        let status = engine.status().unwrap();
        assert_eq!(status.tasks_queued, 1);
        assert_eq!(status.patches_total, 0);
    }
}
