//! End-to-end tests over the full engine: ingestion determinism, sandbox
//! enforcement, the patch protocol, budgets, self-healing, and the task
//! queue lifecycle across restarts.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use codeloom::agent::{AgentLoop, Completion, Engine, ScriptedGateway};
use codeloom::embedding::HashEmbedder;
use codeloom::queue::{Checkpoint, NewTask, TaskQueue, TaskStatus};
use codeloom::store::{ChunkType, SearchFilters};
use codeloom::{ToolCall, VectorGit, VectorGitConfig};

fn open_engine(tmp: &TempDir) -> Arc<Engine> {
    let ws = tmp.path().join("project").join("workspace");
    Arc::new(Engine::open(&ws, Some(Arc::new(HashEmbedder::default()))).unwrap())
}

#[test]
fn deterministic_chunking_and_citation() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let project = engine.sandbox().project_root().to_path_buf();
    std::fs::write(project.join("a.py"), "def foo():\n    return 1\n").unwrap();

    let first = engine.ingest(".").unwrap();
    assert_eq!(first.chunks_added, 1);

    // Second ingest of the unchanged file: no chunks, no embeddings.
    let second = engine.ingest(".").unwrap();
    assert_eq!(second.chunks_added, 0);
    assert_eq!(second.files_ingested, 0);

    let mut git = engine.vectorgit().write().unwrap();
    let hits = git.search("foo", 5, &SearchFilters::default());
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(hit.chunk_type, ChunkType::Function);
    assert_eq!(hit.name.as_deref(), Some("foo"));
    assert_eq!(hit.start_line, 1);
    assert_eq!(hit.end_line, 2);
    assert!(hit.chunk_id.starts_with("chunk_"));
    assert_eq!(hit.chunk_id.len(), 6 + 16);

    // The hit's chunk ID is exactly the stored chunk's ID.
    let record = git.chunk(&hit.chunk_id).unwrap();
    assert_eq!(record.metadata.chunk_id, hit.chunk_id);
    assert_eq!(record.content, "def foo():\n    return 1\n");
}

#[test]
fn write_through_patch_enforcement() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);

    let gateway = Arc::new(ScriptedGateway::new(vec![
        Completion::calls(vec![ToolCall::with_id(
            "c1",
            "write_file",
            json!({"path": "core/../../core/state.py", "content": "x"}),
        )]),
        Completion::text("blocked as expected"),
    ]));
    let (result, state) = AgentLoop::new(Arc::clone(&engine), gateway).run("edit core/state.py");
    assert!(result.success);

    let observe = state
        .execution
        .steps
        .iter()
        .find(|s| !s.tool_results.is_empty())
        .unwrap();
    let text = observe.tool_results[0].observed_text();
    assert!(text.starts_with("ERROR [PATH_OUTSIDE_WORKSPACE]"), "{text}");
    assert!(text.contains("Blocked by: workspace"));

    // No bytes written anywhere outside the workspace.
    assert!(!engine.sandbox().project_root().join("core").exists());
}

#[test]
fn patch_creation_and_retrieval() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);

    let diff = "--- a/core/x\n+++ b/core/x\n@@ -1 +1 @@\n-old\n+new\n";
    let call = ToolCall::with_id(
        "c1",
        "create_patch",
        json!({
            "title": "Fix widget parsing",
            "description": "Widget ids were truncated.",
            "target_files": ["core/x"],
            "plan": "Widen the id field.",
            "diff": diff,
            "tests": "Run the widget suite.",
        }),
    );
    let gateway = Arc::new(ScriptedGateway::new(vec![
        Completion::calls(vec![call]),
        Completion::text("patch proposed; next: run tests"),
    ]));
    let (result, _state) = AgentLoop::new(Arc::clone(&engine), gateway).run("propose the fix");
    assert!(result.success);

    let patches = engine.patches().list(None).unwrap();
    assert_eq!(patches.len(), 1);
    let id = &patches[0].patch_id;
    let id_re = regex::Regex::new(r"^\d{8}_\d{6}_.+$").unwrap();
    assert!(id_re.is_match(id));

    let dir = engine
        .sandbox()
        .workspace_root()
        .join("patches")
        .join(id);
    for file in ["plan.md", "patch.diff", "tests.md", "metadata.json"] {
        assert!(dir.join(file).is_file(), "{file}");
    }

    let full = engine.patches().get(id).unwrap();
    assert_eq!(full.diff_text, diff);
    assert_eq!(full.plan_md, "Widen the id field.");
    assert_eq!(full.tests_md, "Run the widget suite.");

    let proposed = engine
        .patches()
        .list(Some(codeloom::PatchStatus::Proposed))
        .unwrap();
    assert!(proposed.iter().any(|p| &p.patch_id == id));
}

#[test]
fn budget_exhaustion_resets_next_step() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);

    let step_one = vec![
        ToolCall::with_id("c1", "write_file", json!({"path": "a.txt", "content": "1"})),
        ToolCall::with_id("c2", "write_file", json!({"path": "b.txt", "content": "2"})),
        ToolCall::with_id("c3", "write_file", json!({"path": "c.txt", "content": "3"})),
    ];
    let step_two = vec![ToolCall::with_id(
        "c4",
        "read_file",
        json!({"path": "a.txt"}),
    )];
    let gateway = Arc::new(ScriptedGateway::new(vec![
        Completion::calls(step_one),
        Completion::calls(step_two),
        Completion::text("done"),
    ]));
    let agent = AgentLoop::new(Arc::clone(&engine), gateway).with_max_tools_per_step(2);
    let (result, state) = agent.run("write three files then read one");
    assert!(result.success);

    let observes: Vec<_> = state
        .execution
        .steps
        .iter()
        .filter(|s| !s.tool_results.is_empty())
        .collect();
    // Step one: two executions and one budget refusal.
    assert!(observes[0].tool_results[0].success);
    assert!(observes[0].tool_results[1].success);
    assert!(
        observes[0].tool_results[2]
            .observed_text()
            .contains("BUDGET_EXCEEDED")
    );
    // Step two: the budget reset, so the read executed.
    assert!(observes[1].tool_results[0].success);
}

#[test]
fn self_heal_after_matrix_truncation() {
    let tmp = TempDir::new().unwrap();
    let project = tmp.path().join("project");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(project.join("a.py"), "def alpha():\n    return 1\n").unwrap();
    std::fs::write(project.join("b.py"), "def beta():\n    return 2\n").unwrap();
    let store = project.join("workspace").join("store");

    {
        let mut git = VectorGit::open(
            &store,
            Some(Arc::new(HashEmbedder::default())),
            VectorGitConfig::default(),
        )
        .unwrap();
        let report = git.ingest_path(&project, &project).unwrap();
        assert_eq!(report.chunks_added, 2);
    }

    // Truncate the matrix to zero bytes.
    std::fs::write(store.join("vectors.matrix"), b"").unwrap();

    // With a gateway: every chunk re-embedded.
    {
        let git = VectorGit::open(
            &store,
            Some(Arc::new(HashEmbedder::default())),
            VectorGitConfig::default(),
        )
        .unwrap();
        assert_eq!(git.vector_count(), 2);
    }

    // Without a gateway: cleared, keyword-only retrieval still works.
    std::fs::write(store.join("vectors.matrix"), b"").unwrap();
    {
        let mut git = VectorGit::open(&store, None, VectorGitConfig::default()).unwrap();
        assert_eq!(git.vector_count(), 0);
        let hits = git.search("alpha", 5, &SearchFilters::default());
        assert_eq!(hits.len(), 1);
    }
}

#[test]
fn task_lifecycle_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let queue_dir = tmp.path().join("workspace").join("queue");

    {
        let mut queue = TaskQueue::open(&queue_dir).unwrap();
        for objective in ["index the repo", "sweep for dead code", "draft the report"] {
            queue
                .add_task(NewTask {
                    objective: objective.to_string(),
                    ..Default::default()
                })
                .unwrap();
        }

        let claimed = queue.get_next().unwrap().unwrap();
        assert_eq!(claimed.task_id, "task_0001");
        assert_eq!(claimed.status, TaskStatus::Running);

        let checkpoint = Checkpoint {
            task_id: "task_0001".to_string(),
            what_was_done: "Indexed 42 files.".to_string(),
            what_changed: vec!["workspace/store/manifest.json".to_string()],
            what_next: "Start the dead-code sweep.".to_string(),
            blockers: vec![],
            citations: vec!["chunk_00ff00ff00ff00ff".to_string()],
            created_at: chrono::Utc::now(),
        };
        queue.mark_done("task_0001", Some(&checkpoint)).unwrap();
        assert!(
            queue_dir
                .join("checkpoints")
                .join("task_0001.md")
                .is_file()
        );

        let next = queue.get_next().unwrap().unwrap();
        assert_eq!(next.task_id, "task_0002");
    }

    // Restart: statuses are exactly as committed.
    let queue = TaskQueue::open(&queue_dir).unwrap();
    let statuses: Vec<TaskStatus> = queue.list().iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Done, TaskStatus::Running, TaskStatus::Queued]
    );
}

#[test]
fn search_results_are_reproducible() {
    let tmp = TempDir::new().unwrap();
    let engine = open_engine(&tmp);
    let project = engine.sandbox().project_root().to_path_buf();
    std::fs::write(
        project.join("m.py"),
        "def shared_helper():\n    pass\n\ndef other_helper():\n    shared_helper()\n",
    )
    .unwrap();
    engine.ingest(".").unwrap();

    let mut git = engine.vectorgit().write().unwrap();
    let first = git.search("helper", 10, &SearchFilters::default());
    let second = git.search("helper", 10, &SearchFilters::default());
    assert_eq!(first, second);
    assert!(!first.is_empty());
}
