//! CLI command execution over the engine.

use std::sync::Arc;

use crate::agent::{AgentLoop, Completion, Engine, ScriptedGateway};
use crate::embedding::HashEmbedder;
use crate::error::{Error, Result};
use crate::queue::NewTask;
use crate::store::SearchFilters;

use super::output::{OutputFormat, render};
use super::parser::{Cli, Commands, PatchCommands, QueueCommands};

/// Executes the parsed CLI command, returning the rendered output.
///
/// # Errors
///
/// Returns the underlying engine error; the binary formats it for the
/// terminal.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let engine = Engine::open(cli.workspace_path(), Some(Arc::new(HashEmbedder::default())))?;

    match &cli.command {
        Commands::Init => {
            let status = engine.status()?;
            Ok(render(
                format,
                &status,
                format!(
                    "workspace initialized at {}\nchunks: {}, vectors: {}",
                    engine.sandbox().workspace_root().display(),
                    status.chunks,
                    status.vectors
                ),
            ))
        }

        Commands::Status => {
            let status = engine.status()?;
            Ok(render(
                format,
                &status,
                format!(
                    "chunks: {} (index dirty: {})\nvectors: {}\npatches: {} ({} proposed)\ntasks: {} queued, {} running, {} terminal\nworkspace: {} bytes",
                    status.chunks,
                    status.index_dirty,
                    status.vectors,
                    status.patches_total,
                    status.patches_proposed,
                    status.tasks_queued,
                    status.tasks_running,
                    status.tasks_terminal,
                    status.workspace_size_bytes
                ),
            ))
        }

        Commands::Ingest { path } => {
            let report = engine.ingest(path)?;
            Ok(format!(
                "ingested {} files ({} skipped): +{} chunks, -{} evicted, {} embed failures",
                report.files_ingested,
                report.files_skipped,
                report.chunks_added,
                report.chunks_evicted,
                report.embed_failures
            ))
        }

        Commands::Search {
            query,
            k,
            path_prefix,
            file_type,
        } => {
            let filters = SearchFilters {
                path_prefix: path_prefix.clone(),
                file_type: file_type.clone(),
                ..Default::default()
            };
            let mut git = engine.vectorgit().write().map_err(|_| Error::InvalidState {
                message: "retrieval lock poisoned".to_string(),
            })?;
            let hits = git.search(query, *k, &filters);
            if hits.is_empty() {
                return Ok("no matching chunks".to_string());
            }
            let text = hits
                .iter()
                .map(|h| {
                    format!(
                        "[{}] {}:{}-{} score={:.4}\n    {}",
                        h.chunk_id,
                        h.source_path,
                        h.start_line,
                        h.end_line,
                        h.score,
                        h.snippet.replace('\n', "\n    ")
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");
            Ok(render(format, &hits, text))
        }

        Commands::Explain { query, k } => {
            let mut git = engine.vectorgit().write().map_err(|_| Error::InvalidState {
                message: "retrieval lock poisoned".to_string(),
            })?;
            let lines = git.explain(query, *k);
            if lines.is_empty() {
                Ok("no matching chunks".to_string())
            } else {
                Ok(lines.join("\n"))
            }
        }

        Commands::Patch(PatchCommands::List { status }) => {
            let parsed = match status.as_deref() {
                None => None,
                Some(raw) => Some(raw.parse().map_err(|e: String| Error::Config {
                    message: e,
                })?),
            };
            let patches = engine.patches().list(parsed)?;
            if patches.is_empty() {
                return Ok("no patches".to_string());
            }
            let text = patches
                .iter()
                .map(|p| format!("{} [{}] {}", p.patch_id, p.status, p.title))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(render(format, &patches, text))
        }

        Commands::Patch(PatchCommands::Show { patch_id }) => {
            let patch = engine.patches().get(patch_id)?;
            let text = format!(
                "{} [{}] {}\n\n## Plan\n{}\n\n## Diff\n{}\n\n## Tests\n{}",
                patch.metadata.patch_id,
                patch.metadata.status,
                patch.metadata.title,
                patch.plan_md,
                patch.diff_text,
                patch.tests_md
            );
            Ok(render(format, &patch, text))
        }

        Commands::Patch(PatchCommands::SetStatus { patch_id, status }) => {
            let parsed = status.parse().map_err(|e: String| Error::Config {
                message: e,
            })?;
            let metadata = engine.patches().update_status(patch_id, parsed)?;
            Ok(format!("{} [{}]", metadata.patch_id, metadata.status))
        }

        Commands::Queue(QueueCommands::Add {
            objective,
            acceptance,
            input,
        }) => {
            let task = lock_queue(&engine)?.add_task(NewTask {
                objective: objective.clone(),
                inputs: input.clone(),
                acceptance: acceptance.clone().unwrap_or_default(),
                ..Default::default()
            })?;
            Ok(format!("{} [{}] {}", task.task_id, task.status, task.objective))
        }

        Commands::Queue(QueueCommands::List) => {
            let queue = lock_queue(&engine)?;
            let tasks = queue.list();
            if tasks.is_empty() {
                return Ok("queue is empty".to_string());
            }
            let text = tasks
                .iter()
                .map(|t| format!("{} [{}] {}", t.task_id, t.status, t.objective))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(render(format, &tasks.to_vec(), text))
        }

        Commands::Queue(QueueCommands::Next) => match lock_queue(&engine)?.get_next()? {
            Some(task) => Ok(format!("{} [{}] {}", task.task_id, task.status, task.objective)),
            None => Ok("queue is empty".to_string()),
        },

        Commands::Queue(QueueCommands::Done { task_id }) => {
            let task = lock_queue(&engine)?.mark_done(task_id, None)?;
            Ok(format!("{} [{}]", task.task_id, task.status))
        }

        Commands::Queue(QueueCommands::Fail { task_id, error }) => {
            let task = lock_queue(&engine)?.mark_failed(task_id, error, None)?;
            Ok(format!("{} [{}]", task.task_id, task.status))
        }

        Commands::Run {
            script,
            message,
            max_steps,
        } => {
            let raw = std::fs::read_to_string(script)?;
            let completions: Vec<Completion> =
                serde_json::from_str(&raw).map_err(|e| Error::Config {
                    message: format!("script does not parse as completions: {e}"),
                })?;
            let gateway = Arc::new(ScriptedGateway::new(completions));
            let agent = AgentLoop::new(Arc::new(engine), gateway).with_max_steps(*max_steps);
            let (result, _state) = agent.run(message);
            if result.success {
                Ok(format!(
                    "{}\n({} steps)",
                    result.final_answer, result.steps_used
                ))
            } else {
                Err(Error::InvalidState {
                    message: result
                        .error
                        .unwrap_or_else(|| "run failed".to_string()),
                })
            }
        }
    }
}

fn lock_queue(
    engine: &Engine,
) -> Result<std::sync::MutexGuard<'_, crate::queue::TaskQueue>> {
    engine.queue().lock().map_err(|_| Error::InvalidState {
        message: "queue lock poisoned".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli(tmp: &TempDir, command: Commands) -> Cli {
        Cli {
            workspace: Some(tmp.path().join("project").join("workspace")),
            verbose: false,
            format: "text".to_string(),
            command,
        }
    }

    #[test]
    fn test_init_and_status() {
        let tmp = TempDir::new().unwrap();
        let out = execute(&cli(&tmp, Commands::Init)).unwrap();
        assert!(out.contains("workspace initialized"));

        let out = execute(&cli(&tmp, Commands::Status)).unwrap();
        assert!(out.contains("chunks: 0"));
    }

    #[test]
    fn test_ingest_then_search() {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("project");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("a.py"), "def foo():\n    return 1\n").unwrap();

        let out = execute(&cli(&tmp, Commands::Ingest { path: ".".into() })).unwrap();
        assert!(out.contains("+1 chunks"));

        let out = execute(&cli(
            &tmp,
            Commands::Search {
                query: "foo".to_string(),
                k: 5,
                path_prefix: None,
                file_type: None,
            },
        ))
        .unwrap();
        assert!(out.contains("a.py:1-2"));
    }

    #[test]
    fn test_queue_lifecycle_via_cli() {
        let tmp = TempDir::new().unwrap();
        let out = execute(&cli(
            &tmp,
            Commands::Queue(QueueCommands::Add {
                objective: "index".to_string(),
                acceptance: None,
                input: vec![],
            }),
        ))
        .unwrap();
        assert!(out.starts_with("task_0001 [queued]"));

        let out = execute(&cli(&tmp, Commands::Queue(QueueCommands::Next))).unwrap();
        assert!(out.starts_with("task_0001 [running]"));

        let out = execute(&cli(
            &tmp,
            Commands::Queue(QueueCommands::Done {
                task_id: "task_0001".to_string(),
            }),
        ))
        .unwrap();
        assert_eq!(out, "task_0001 [done]");
    }

    #[test]
    fn test_run_with_script() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("script.json");
        std::fs::write(&script, r#"[{"content": "scripted answer"}]"#).unwrap();

        let out = execute(&cli(
            &tmp,
            Commands::Run {
                script,
                message: "go".to_string(),
                max_steps: 5,
            },
        ))
        .unwrap();
        assert!(out.contains("scripted answer"));
        assert!(out.contains("(1 steps)"));
    }
}
