//! Retrieval façade ("`VectorGit`"): ingest, hybrid query, explain, and
//! self-healing over the chunk manifest and vector store.
//!
//! Keyword and vector retrieval each produce a ranked candidate list; the
//! hybrid query fuses them by reciprocal rank. Embedding failures are soft:
//! retrieval degrades to keyword-only rather than failing the call.

pub mod rrf;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::embedding::{DEFAULT_DIMENSIONS, EmbeddingGateway};
use crate::error::StoreError;
use crate::sandbox::is_sensitive_component;
use crate::store::{
    ChunkManifest, ChunkRecord, SearchFilters, SearchHit, VectorStore, chunk_source, index,
};
use rrf::{RrfConfig, reciprocal_rank_fusion};

/// Manifest file name under the store directory.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Vector ids file name.
pub const VECTOR_IDS_FILE: &str = "vectors.ids";
/// Vector matrix file name.
pub const VECTOR_MATRIX_FILE: &str = "vectors.matrix";

/// Candidate depth taken from each retrieval mode before fusion.
const FUSION_CANDIDATES: usize = 20;

/// Configuration for the retrieval façade.
#[derive(Debug, Clone)]
pub struct VectorGitConfig {
    /// Rebuild (or clear) the vector store when corruption is detected at
    /// startup instead of failing.
    pub auto_heal: bool,
    /// Directory names excluded from ingestion.
    pub ignore_dirs: BTreeSet<String>,
    /// Reciprocal rank fusion parameters.
    pub fusion: RrfConfig,
}

impl Default for VectorGitConfig {
    fn default() -> Self {
        let ignore_dirs = [
            ".git",
            "workspace",
            "target",
            "node_modules",
            "__pycache__",
            ".venv",
            "venv",
            "dist",
            "build",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self {
            auto_heal: true,
            ignore_dirs,
            fusion: RrfConfig::default(),
        }
    }
}

/// Summary of one ingest pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Files chunked in this pass.
    pub files_ingested: usize,
    /// Files skipped (unchanged mtime or unreadable as UTF-8).
    pub files_skipped: usize,
    /// Chunks newly added.
    pub chunks_added: usize,
    /// Chunks purged (with their vectors).
    pub chunks_evicted: usize,
    /// Chunks whose embedding failed (keyword-only until re-ingest).
    pub embed_failures: usize,
}

/// What self-heal did at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealOutcome {
    /// Store loaded clean; nothing to do.
    Intact,
    /// All chunks re-embedded through the gateway.
    Reembedded(usize),
    /// No gateway available; vector store cleared, keyword-only retrieval.
    Cleared,
}

/// The retrieval façade.
pub struct VectorGit {
    store_dir: PathBuf,
    manifest: ChunkManifest,
    vectors: VectorStore,
    embedder: Option<Arc<dyn EmbeddingGateway>>,
    config: VectorGitConfig,
}

impl std::fmt::Debug for VectorGit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorGit")
            .field("store_dir", &self.store_dir)
            .field("manifest", &self.manifest)
            .field("vectors", &self.vectors)
            .field("embedder", &self.embedder.as_ref().map(|_| "EmbeddingGateway"))
            .field("config", &self.config)
            .finish()
    }
}

impl VectorGit {
    /// Opens (or initializes) the store under `store_dir`.
    ///
    /// Loads the manifest, then the vector store. On `CORRUPTED_INDEX` or
    /// a count mismatch between manifest chunks and vector ids, heals when
    /// `auto_heal` is set: re-embeds every chunk if a gateway is wired,
    /// otherwise clears the vector store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on unreadable artifacts, or the corruption
    /// error itself when `auto_heal` is disabled.
    pub fn open(
        store_dir: impl AsRef<Path>,
        embedder: Option<Arc<dyn EmbeddingGateway>>,
        config: VectorGitConfig,
    ) -> std::result::Result<Self, StoreError> {
        let store_dir = store_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&store_dir).map_err(|e| StoreError::Io {
            path: store_dir.display().to_string(),
            reason: e.to_string(),
        })?;

        let manifest = ChunkManifest::load_or_default(&store_dir.join(MANIFEST_FILE))?;
        let dim = embedder
            .as_ref()
            .map_or(DEFAULT_DIMENSIONS, |e| e.dimensions());

        let ids_path = store_dir.join(VECTOR_IDS_FILE);
        let matrix_path = store_dir.join(VECTOR_MATRIX_FILE);

        let mut git = Self {
            store_dir,
            manifest,
            vectors: VectorStore::new(dim),
            embedder,
            config,
        };

        if ids_path.exists() != matrix_path.exists() {
            // One artifact without its twin is corruption, not absence.
            tracing::warn!("vector store files incomplete");
            git.heal_or_fail("ids/matrix file pair incomplete")?;
        } else if ids_path.exists() {
            match VectorStore::load(&ids_path, &matrix_path, dim) {
                Ok(vectors) => {
                    git.vectors = vectors;
                    if git.vectors.len() != git.manifest.len() {
                        tracing::warn!(
                            vector_ids = git.vectors.len(),
                            manifest_chunks = git.manifest.len(),
                            "vector store out of sync with manifest"
                        );
                        git.heal_or_fail("id count does not match manifest")?;
                    }
                }
                Err(err @ StoreError::CorruptedIndex { .. }) => {
                    tracing::warn!(error = %err, "vector store corrupted");
                    git.heal_or_fail(&err.to_string())?;
                }
                Err(other) => return Err(other),
            }
        } else if !git.manifest.is_empty() && git.embedder.is_some() {
            // Manifest without vectors: same as a count mismatch.
            git.heal_or_fail("vector files missing for populated manifest")?;
        }

        Ok(git)
    }

    fn heal_or_fail(&mut self, reason: &str) -> std::result::Result<(), StoreError> {
        if !self.config.auto_heal {
            return Err(StoreError::CorruptedIndex {
                reason: reason.to_string(),
            });
        }
        let outcome = self.heal()?;
        tracing::info!(?outcome, "vector store healed");
        Ok(())
    }

    /// Rebuilds the vector store from manifest contents: re-embeds every
    /// chunk when a gateway is wired, clears otherwise. Persists the
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if re-embedding or persistence fails.
    pub fn heal(&mut self) -> std::result::Result<HealOutcome, StoreError> {
        self.vectors.clear();
        let outcome = if let Some(embedder) = self.embedder.clone() {
            let records: Vec<&ChunkRecord> = self.manifest.records().collect();
            let texts: Vec<String> = records.iter().map(|r| contextual_text(r)).collect();
            let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let embeddings = embedder.embed(&text_refs)?;
            for (record, embedding) in records.iter().zip(embeddings.iter()) {
                self.vectors.upsert(&record.metadata.chunk_id, embedding)?;
            }
            HealOutcome::Reembedded(self.vectors.len())
        } else {
            HealOutcome::Cleared
        };
        self.persist_vectors()?;
        Ok(outcome)
    }

    /// Number of chunks in the manifest.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.manifest.len()
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn vector_count(&self) -> usize {
        self.vectors.len()
    }

    /// Whether the inverted index is awaiting a rebuild.
    #[must_use]
    pub const fn is_index_dirty(&self) -> bool {
        self.manifest.is_index_dirty()
    }

    /// Looks up a chunk record by ID.
    #[must_use]
    pub fn chunk(&self, chunk_id: &str) -> Option<&ChunkRecord> {
        self.manifest.chunk(chunk_id)
    }

    /// Ingests a file or directory tree rooted at `target`.
    ///
    /// Source paths are recorded relative to `base`. The ignore set
    /// (workspace artifacts, VCS metadata, build output, sensitive
    /// patterns) is applied during the walk. Persists the manifest and
    /// vectors after the pass.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on persistence failure. Unreadable or
    /// non-UTF-8 files are skipped, not fatal.
    pub fn ingest_path(
        &mut self,
        base: &Path,
        target: &Path,
    ) -> std::result::Result<IngestReport, StoreError> {
        let mut report = IngestReport::default();
        let files = self.collect_files(target);

        for file in files {
            let Ok(content) = std::fs::read_to_string(&file) else {
                report.files_skipped += 1;
                continue;
            };
            let mtime = file_mtime(&file);
            let path_key = file
                .strip_prefix(base)
                .unwrap_or(&file)
                .to_string_lossy()
                .to_string();

            let chunks = chunk_source(&file, &content);
            let outcome = self.manifest.ingest_file(&path_key, mtime, &chunks);
            if outcome.skipped {
                report.files_skipped += 1;
                continue;
            }
            report.files_ingested += 1;
            report.chunks_added += outcome.added.len();
            report.chunks_evicted += outcome.evicted.len();

            for evicted in &outcome.evicted {
                self.vectors.remove(evicted);
            }
            if let Some(embedder) = self.embedder.clone() {
                for chunk_id in &outcome.added {
                    let Some(record) = self.manifest.chunk(chunk_id) else {
                        continue;
                    };
                    match embedder.embed_single(&contextual_text(record)) {
                        Ok(embedding) => self.vectors.upsert(chunk_id, &embedding)?,
                        Err(err) => {
                            tracing::warn!(chunk_id, error = %err, "embedding failed");
                            report.embed_failures += 1;
                        }
                    }
                }
            }
        }

        self.manifest.ensure_index();
        self.persist()?;
        Ok(report)
    }

    /// Hybrid search: keyword and vector candidate lists fused by
    /// reciprocal rank. Falls back to whichever list is non-empty when the
    /// other produced nothing; embedding failures degrade to keyword-only.
    pub fn search(&mut self, query: &str, k: usize, filters: &SearchFilters) -> Vec<SearchHit> {
        if k == 0 {
            return Vec::new();
        }
        let keyword = self.manifest.search(query, FUSION_CANDIDATES, filters);
        let vector = self.vector_candidates(query, filters);

        if vector.is_empty() {
            let mut hits = keyword;
            hits.truncate(k);
            return hits;
        }
        if keyword.is_empty() {
            let mut hits = vector;
            hits.truncate(k);
            return hits;
        }

        let keyword_ids: Vec<String> = keyword.iter().map(|h| h.chunk_id.clone()).collect();
        let vector_ids: Vec<String> = vector.iter().map(|h| h.chunk_id.clone()).collect();
        let fused = reciprocal_rank_fusion(&[&keyword_ids, &vector_ids], self.config.fusion);

        let query_tokens = index::tokenize(query);
        let mut hits = Vec::with_capacity(k.min(fused.len()));
        for (chunk_id, score) in fused.into_iter().take(k) {
            // Prefer the keyword hit (it already carries a snippet).
            let existing = keyword
                .iter()
                .chain(vector.iter())
                .find(|h| h.chunk_id == chunk_id);
            if let Some(hit) = existing {
                let mut hit = hit.clone();
                hit.score = score;
                hits.push(hit);
            } else if let Some(record) = self.manifest.chunk(&chunk_id) {
                hits.push(hit_from_record(record, score, &query_tokens));
            }
        }
        hits
    }

    /// Explains a query: one citation line per hit, carrying the chunk ID,
    /// location, kind, and snippet.
    pub fn explain(&mut self, query: &str, k: usize) -> Vec<String> {
        self.search(query, k, &SearchFilters::default())
            .into_iter()
            .map(|hit| {
                let name = hit.name.as_deref().unwrap_or("-");
                format!(
                    "[{}] {}:{}-{} {} {} :: {}",
                    hit.chunk_id,
                    hit.source_path,
                    hit.start_line,
                    hit.end_line,
                    hit.chunk_type,
                    name,
                    hit.snippet.replace('\n', " ")
                )
            })
            .collect()
    }

    /// Persists the manifest and vector files atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on I/O failure.
    pub fn persist(&self) -> std::result::Result<(), StoreError> {
        self.manifest.save(&self.store_dir.join(MANIFEST_FILE))?;
        self.persist_vectors()
    }

    fn persist_vectors(&self) -> std::result::Result<(), StoreError> {
        self.vectors.save(
            &self.store_dir.join(VECTOR_IDS_FILE),
            &self.store_dir.join(VECTOR_MATRIX_FILE),
        )
    }

    fn vector_candidates(&self, query: &str, filters: &SearchFilters) -> Vec<SearchHit> {
        let Some(embedder) = &self.embedder else {
            return Vec::new();
        };
        if self.vectors.is_empty() {
            return Vec::new();
        }
        let query_vec = match embedder.embed_single(query) {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err, "query embedding failed, keyword-only");
                return Vec::new();
            }
        };
        let query_tokens = index::tokenize(query);
        self.vectors
            .top_k(&query_vec, FUSION_CANDIDATES)
            .into_iter()
            .filter_map(|(chunk_id, score)| {
                let record = self.manifest.chunk(&chunk_id)?;
                let meta = &record.metadata;
                filters
                    .accepts(&meta.source_path, meta.chunk_type, &meta.tags)
                    .then(|| hit_from_record(record, f64::from(score), &query_tokens))
            })
            .collect()
    }

    fn collect_files(&self, target: &Path) -> Vec<PathBuf> {
        if target.is_file() {
            return vec![target.to_path_buf()];
        }
        let ignore = &self.config.ignore_dirs;
        let store_dir = self.store_dir.clone();
        WalkDir::new(target)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                // The store never ingests its own artifacts.
                if entry.path().starts_with(&store_dir) {
                    return false;
                }
                let name = entry.file_name().to_string_lossy();
                if entry.file_type().is_dir() && ignore.contains(name.as_ref()) {
                    return false;
                }
                !is_sensitive_component(&name)
            })
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect()
    }
}

/// Wraps a chunk for embedding with its location context, recorded as the
/// `contextual_v1` format.
#[must_use]
pub fn contextual_text(record: &ChunkRecord) -> String {
    let meta = &record.metadata;
    let mut out = format!("File: {}\nType: {}\n", meta.source_path, meta.chunk_type);
    if let Some(name) = &meta.name {
        out.push_str("Name: ");
        out.push_str(name);
        out.push('\n');
    }
    out.push_str("---\n");
    out.push_str(&record.content);
    out
}

fn hit_from_record(record: &ChunkRecord, score: f64, query_tokens: &[String]) -> SearchHit {
    let meta = &record.metadata;
    SearchHit {
        chunk_id: meta.chunk_id.clone(),
        score,
        source_path: meta.source_path.clone(),
        start_line: meta.start_line,
        end_line: meta.end_line,
        chunk_type: meta.chunk_type,
        name: meta.name.clone(),
        snippet: index::extract_snippet(&record.content, query_tokens),
    }
}

fn file_mtime(path: &Path) -> f64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0.0, |d| d.as_secs_f64())
}
