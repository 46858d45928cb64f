//! `search_chunks`: the retrieval façade exposed as a tool.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use serde::Deserialize;
use serde_json::Value;

use super::{Tool, ToolOutcome, parse_args, schema};
use crate::error::ToolError;
use crate::retrieval::VectorGit;
use crate::store::{ChunkType, SearchFilters};

/// Default result count.
const DEFAULT_K: usize = 8;

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default)]
    k: Option<usize>,
    #[serde(default)]
    path_prefix: Option<String>,
    #[serde(default)]
    file_type: Option<String>,
    #[serde(default)]
    chunk_type: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

/// Hybrid chunk search with citable results.
pub struct SearchChunksTool {
    vectorgit: Arc<RwLock<VectorGit>>,
}

impl SearchChunksTool {
    /// Creates the tool over the shared retrieval façade.
    #[must_use]
    pub fn new(vectorgit: Arc<RwLock<VectorGit>>) -> Self {
        Self { vectorgit }
    }
}

impl Tool for SearchChunksTool {
    fn name(&self) -> &'static str {
        "search_chunks"
    }

    fn description(&self) -> &'static str {
        "Search indexed code chunks (keyword + vector, rank-fused); cite results by chunk_id"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[
                ("query", schema::string("Search query")),
                ("k", schema::integer("Maximum results (default 8)")),
                ("path_prefix", schema::string("Only chunks whose source path starts with this")),
                ("file_type", schema::string("Only chunks whose source path ends with this suffix")),
                (
                    "chunk_type",
                    schema::string_enum(
                        "Only chunks of this kind",
                        &["function", "class", "section", "file"],
                    ),
                ),
                ("tags", schema::string_array("Only chunks carrying all of these tags")),
            ],
            &["query"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: SearchParams = parse_args(arguments)?;
        let chunk_type = match params.chunk_type.as_deref() {
            None => None,
            Some("function") => Some(ChunkType::Function),
            Some("class") => Some(ChunkType::Class),
            Some("section") => Some(ChunkType::Section),
            Some("file") => Some(ChunkType::File),
            Some(other) => {
                return Err(ToolError::rules(
                    "SCHEMA_VIOLATION",
                    format!("unknown chunk_type: {other}"),
                ));
            }
        };
        let filters = SearchFilters {
            path_prefix: params.path_prefix,
            file_type: params.file_type,
            chunk_type,
            tags: params.tags.into_iter().collect::<BTreeSet<String>>(),
        };

        let mut git = self
            .vectorgit
            .write()
            .map_err(|_| ToolError::runtime("STORE_IO", "retrieval lock poisoned"))?;
        if git.chunk_count() == 0 {
            return Err(ToolError::missing(
                "INDEX_EMPTY",
                "no chunks are indexed; ingest the project first",
            ));
        }

        let hits = git.search(&params.query, params.k.unwrap_or(DEFAULT_K), &filters);
        if hits.is_empty() {
            return Ok("no matching chunks".to_string());
        }
        let lines: Vec<String> = hits
            .iter()
            .map(|hit| {
                let name = hit.name.as_deref().unwrap_or("-");
                format!(
                    "[{}] {}:{}-{} ({} {}) score={:.4}\n    {}",
                    hit.chunk_id,
                    hit.source_path,
                    hit.start_line,
                    hit.end_line,
                    hit.chunk_type,
                    name,
                    hit.score,
                    hit.snippet.replace('\n', "\n    ")
                )
            })
            .collect();
        Ok(lines.join("\n"))
    }
}
