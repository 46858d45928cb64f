//! Chunk manifest: chunk records, file mtimes, location tracking, and the
//! inverted keyword index, persisted as one atomic JSON document.
//!
//! Chunk content is part of the manifest payload, so the whole store is
//! reloadable from `manifest.json` alone. That is what lets self-heal
//! re-embed every chunk after vector corruption.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chunker::{ChunkType, SourceChunk};
use super::index::{self, SearchFilters, SearchHit};
use super::write_atomic;
use crate::core::ids;
use crate::error::StoreError;

/// Embedding text format identifier recorded in manifests and vector
/// metadata, so format skews are detectable on load.
pub const EMBEDDING_FORMAT: &str = "contextual_v1";

/// Metadata for one chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Content-derived ID: `chunk_` + 16 hex chars of SHA-256.
    pub chunk_id: String,
    /// Source path of the chunk's first sighting (project-relative).
    pub source_path: String,
    /// First line, 1-based.
    pub start_line: usize,
    /// Last line, 1-based inclusive.
    pub end_line: usize,
    /// Full SHA-256 of the content.
    pub content_hash: String,
    /// Structural kind.
    pub chunk_type: ChunkType,
    /// Callable or section name, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Free-form tags.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    /// First-sighting timestamp.
    pub created_at: DateTime<Utc>,
}

/// A chunk record: metadata plus the content itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Chunk metadata.
    pub metadata: ChunkMetadata,
    /// Chunk body.
    pub content: String,
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Default)]
pub struct IngestOutcome {
    /// Whether the file was skipped (mtime unchanged).
    pub skipped: bool,
    /// IDs newly added to the manifest by this ingest.
    pub added: Vec<String>,
    /// IDs purged globally (no remaining file references them); the
    /// caller must evict their vectors.
    pub evicted: Vec<String>,
}

/// The chunk manifest.
///
/// Invariants: every ID in a `source_to_chunks` set is a key of `chunks`;
/// when `index_dirty` is false, every posting references an existing chunk
/// and lists are sorted and duplicate-free.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifest {
    chunks: BTreeMap<String, ChunkRecord>,
    file_mtimes: BTreeMap<String, f64>,
    source_to_chunks: BTreeMap<String, BTreeSet<String>>,
    inverted_index: BTreeMap<String, Vec<String>>,
    index_dirty: bool,
    embedding_format: String,
}

impl Default for ChunkManifest {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunks: BTreeMap::new(),
            file_mtimes: BTreeMap::new(),
            source_to_chunks: BTreeMap::new(),
            inverted_index: BTreeMap::new(),
            index_dirty: false,
            embedding_format: EMBEDDING_FORMAT.to_string(),
        }
    }

    /// Number of chunks in the manifest.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the manifest holds no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Whether the inverted index needs a rebuild.
    #[must_use]
    pub const fn is_index_dirty(&self) -> bool {
        self.index_dirty
    }

    /// The embedding format recorded for this manifest.
    #[must_use]
    pub fn embedding_format(&self) -> &str {
        &self.embedding_format
    }

    /// Looks up a chunk record by ID.
    #[must_use]
    pub fn chunk(&self, chunk_id: &str) -> Option<&ChunkRecord> {
        self.chunks.get(chunk_id)
    }

    /// All chunk IDs, sorted.
    #[must_use]
    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.keys().cloned().collect()
    }

    /// Iterates all chunk records in ID order.
    pub fn records(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.chunks.values()
    }

    /// Known source paths, sorted.
    #[must_use]
    pub fn source_paths(&self) -> Vec<String> {
        self.source_to_chunks.keys().cloned().collect()
    }

    /// Whether a file needs re-ingestion: unknown mtime, changed mtime, or
    /// no recorded chunks for the path.
    #[must_use]
    pub fn needs_ingest(&self, path_key: &str, mtime: f64) -> bool {
        let unchanged = self
            .file_mtimes
            .get(path_key)
            .is_some_and(|recorded| (recorded - mtime).abs() < f64::EPSILON);
        let has_chunks = self
            .source_to_chunks
            .get(path_key)
            .is_some_and(|set| !set.is_empty());
        !(unchanged && has_chunks)
    }

    /// Ingests the chunks of one file, diffing against the previous state.
    ///
    /// A chunk is born on first sighting of its content; when re-ingestion
    /// removes content from a file, chunks no longer referenced by any file
    /// are purged and reported in [`IngestOutcome::evicted`].
    pub fn ingest_file(
        &mut self,
        path_key: &str,
        mtime: f64,
        source_chunks: &[SourceChunk],
    ) -> IngestOutcome {
        if !self.needs_ingest(path_key, mtime) {
            return IngestOutcome {
                skipped: true,
                ..Default::default()
            };
        }

        let mut outcome = IngestOutcome::default();
        let mut new_set: BTreeSet<String> = BTreeSet::new();
        for sc in source_chunks {
            let chunk_id = ids::chunk_id(&sc.content);
            new_set.insert(chunk_id.clone());
            if !self.chunks.contains_key(&chunk_id) {
                outcome.added.push(chunk_id.clone());
                self.chunks.insert(
                    chunk_id.clone(),
                    ChunkRecord {
                        metadata: ChunkMetadata {
                            chunk_id,
                            source_path: path_key.to_string(),
                            start_line: sc.start_line,
                            end_line: sc.end_line,
                            content_hash: ids::content_hash(&sc.content),
                            chunk_type: sc.chunk_type,
                            name: sc.name.clone(),
                            tags: BTreeSet::new(),
                            created_at: Utc::now(),
                        },
                        content: sc.content.clone(),
                    },
                );
            }
        }

        let old_set = self
            .source_to_chunks
            .get(path_key)
            .cloned()
            .unwrap_or_default();
        for stale in old_set.difference(&new_set) {
            let referenced_elsewhere = self
                .source_to_chunks
                .iter()
                .any(|(p, set)| p != path_key && set.contains(stale));
            if !referenced_elsewhere {
                self.chunks.remove(stale);
                outcome.evicted.push(stale.clone());
            }
        }

        if new_set.is_empty() {
            self.source_to_chunks.remove(path_key);
        } else {
            self.source_to_chunks.insert(path_key.to_string(), new_set);
        }
        self.file_mtimes.insert(path_key.to_string(), mtime);
        self.index_dirty = true;
        outcome
    }

    /// Rebuilds the inverted index from chunk contents.
    pub fn rebuild_index(&mut self) {
        let mut index: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (chunk_id, record) in &self.chunks {
            for token in index::unique_tokens(&record.content) {
                index.entry(token).or_default().push(chunk_id.clone());
            }
        }
        // BTreeMap iteration is ID-ordered, so postings are born sorted
        // and duplicate-free.
        self.inverted_index = index;
        self.index_dirty = false;
    }

    /// Rebuilds the index if dirty.
    pub fn ensure_index(&mut self) {
        if self.index_dirty {
            self.rebuild_index();
        }
    }

    /// Keyword search: AND-intersection of posting lists, scored by summed
    /// occurrence counts, deterministic ascending-ID tie-break.
    ///
    /// Empty queries, all-absent tokens, `k == 0`, and filters that reject
    /// everything all yield an empty result.
    pub fn search(&mut self, query: &str, k: usize, filters: &SearchFilters) -> Vec<SearchHit> {
        self.ensure_index();
        if k == 0 {
            return Vec::new();
        }
        let query_tokens = index::tokenize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        // Candidates: intersection of the posting lists of tokens that
        // have one; tokens absent from the index do not constrain.
        let mut candidates: Option<BTreeSet<&str>> = None;
        let mut any_present = false;
        for token in &query_tokens {
            if let Some(postings) = self.inverted_index.get(token) {
                any_present = true;
                let set: BTreeSet<&str> = postings.iter().map(String::as_str).collect();
                candidates = Some(match candidates {
                    None => set,
                    Some(existing) => existing.intersection(&set).copied().collect(),
                });
            }
        }
        if !any_present {
            return Vec::new();
        }
        let candidates = candidates.unwrap_or_default();

        let mut hits: Vec<SearchHit> = Vec::new();
        for chunk_id in candidates {
            let Some(record) = self.chunks.get(chunk_id) else {
                continue;
            };
            let meta = &record.metadata;
            if !filters.accepts(&meta.source_path, meta.chunk_type, &meta.tags) {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let score = query_tokens
                .iter()
                .map(|t| index::occurrence_count(&record.content, t))
                .sum::<usize>() as f64;
            hits.push(SearchHit {
                chunk_id: chunk_id.to_string(),
                score,
                source_path: meta.source_path.clone(),
                start_line: meta.start_line,
                end_line: meta.end_line,
                chunk_type: meta.chunk_type,
                name: meta.name.clone(),
                snippet: index::extract_snippet(&record.content, &query_tokens),
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        hits
    }

    /// Persists the manifest atomically (temp, fsync, rename).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or I/O failure.
    pub fn save(&self, path: &Path) -> std::result::Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Loads a manifest and validates structural consistency.
    ///
    /// Dangling references (a location set or posting naming a missing
    /// chunk) are pruned and the index marked dirty, so the next search
    /// rebuilds it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the file cannot be read or parsed.
    pub fn load(path: &Path) -> std::result::Result<Self, StoreError> {
        let bytes = std::fs::read(path).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let mut manifest: Self = serde_json::from_slice(&bytes)?;
        manifest.validate_consistency();
        Ok(manifest)
    }

    /// Loads the manifest if present, otherwise returns an empty one.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when an existing file cannot be parsed.
    pub fn load_or_default(path: &Path) -> std::result::Result<Self, StoreError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }

    fn validate_consistency(&mut self) {
        let mut dirty = self.index_dirty;

        let chunk_ids: BTreeSet<String> = self.chunks.keys().cloned().collect();
        for set in self.source_to_chunks.values_mut() {
            let before = set.len();
            set.retain(|id| chunk_ids.contains(id));
            if set.len() != before {
                dirty = true;
            }
        }
        self.source_to_chunks.retain(|_, set| !set.is_empty());

        for postings in self.inverted_index.values() {
            if postings.iter().any(|id| !chunk_ids.contains(id)) {
                dirty = true;
                break;
            }
        }
        if dirty {
            self.inverted_index.clear();
        }
        self.index_dirty = dirty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::chunker::chunk_source;
    use tempfile::TempDir;

    fn py_chunks(text: &str) -> Vec<SourceChunk> {
        chunk_source(Path::new("a.py"), text)
    }

    #[test]
    fn test_ingest_registers_chunks() {
        let mut manifest = ChunkManifest::new();
        let outcome = manifest.ingest_file("a.py", 1.0, &py_chunks("def foo():\n    return 1\n"));
        assert!(!outcome.skipped);
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(manifest.len(), 1);
        assert!(manifest.is_index_dirty());

        let record = manifest.chunk(&outcome.added[0]).unwrap();
        assert_eq!(record.metadata.name.as_deref(), Some("foo"));
        assert_eq!(record.metadata.start_line, 1);
        assert_eq!(record.metadata.end_line, 2);
    }

    #[test]
    fn test_reingest_unchanged_mtime_skips() {
        let mut manifest = ChunkManifest::new();
        let chunks = py_chunks("def foo():\n    return 1\n");
        manifest.ingest_file("a.py", 1.0, &chunks);
        manifest.rebuild_index();
        let before = manifest.clone();

        let outcome = manifest.ingest_file("a.py", 1.0, &chunks);
        assert!(outcome.skipped);
        assert!(outcome.added.is_empty());
        assert!(!manifest.is_index_dirty());
        assert_eq!(manifest.chunk_ids(), before.chunk_ids());
    }

    #[test]
    fn test_identical_content_shares_chunk_id() {
        let mut manifest = ChunkManifest::new();
        let chunks = py_chunks("def foo():\n    return 1\n");
        let a = manifest.ingest_file("a.py", 1.0, &chunks);
        let b = manifest.ingest_file("b.py", 1.0, &chunks);
        assert_eq!(a.added.len(), 1);
        assert!(b.added.is_empty());
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.source_paths(), vec!["a.py", "b.py"]);
    }

    #[test]
    fn test_stale_chunk_purged_when_unreferenced() {
        let mut manifest = ChunkManifest::new();
        let v1 = py_chunks("def foo():\n    return 1\n");
        let outcome = manifest.ingest_file("a.py", 1.0, &v1);
        let old_id = outcome.added[0].clone();

        let v2 = py_chunks("def foo():\n    return 2\n");
        let outcome = manifest.ingest_file("a.py", 2.0, &v2);
        assert_eq!(outcome.evicted, vec![old_id.clone()]);
        assert!(manifest.chunk(&old_id).is_none());
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn test_stale_chunk_kept_when_shared() {
        let mut manifest = ChunkManifest::new();
        let shared = py_chunks("def foo():\n    return 1\n");
        manifest.ingest_file("a.py", 1.0, &shared);
        manifest.ingest_file("b.py", 1.0, &shared);

        // Content vanishes from a.py but survives in b.py.
        let outcome = manifest.ingest_file("a.py", 2.0, &py_chunks("def bar():\n    return 2\n"));
        assert!(outcome.evicted.is_empty());
        assert_eq!(manifest.len(), 2);
    }

    #[test]
    fn test_search_basic() {
        let mut manifest = ChunkManifest::new();
        manifest.ingest_file("a.py", 1.0, &py_chunks("def foo():\n    return compute()\n"));
        manifest.ingest_file("b.py", 1.0, &py_chunks("def bar():\n    return other()\n"));

        let hits = manifest.search("foo", 5, &SearchFilters::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name.as_deref(), Some("foo"));
        assert!(hits[0].snippet.contains("foo"));
    }

    #[test]
    fn test_search_and_semantics() {
        let mut manifest = ChunkManifest::new();
        manifest.ingest_file("a.py", 1.0, &py_chunks("def alpha():\n    beta()\n"));
        manifest.ingest_file("b.py", 1.0, &py_chunks("def gamma():\n    beta()\n"));

        // Both tokens present: only the chunk containing both matches.
        let hits = manifest.search("alpha beta", 5, &SearchFilters::default());
        assert_eq!(hits.len(), 1);

        // Absent tokens do not constrain.
        let hits = manifest.search("beta zzzzunknown", 5, &SearchFilters::default());
        assert_eq!(hits.len(), 2);

        // All tokens absent: empty.
        let hits = manifest.search("zzzzunknown qqqqmissing", 5, &SearchFilters::default());
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_boundaries() {
        let mut manifest = ChunkManifest::new();
        manifest.ingest_file("a.py", 1.0, &py_chunks("def foo():\n    return 1\n"));

        assert!(manifest.search("", 5, &SearchFilters::default()).is_empty());
        assert!(manifest.search("foo", 0, &SearchFilters::default()).is_empty());

        let reject_all = SearchFilters {
            path_prefix: Some("nowhere/".to_string()),
            ..Default::default()
        };
        assert!(manifest.search("foo", 5, &reject_all).is_empty());
    }

    #[test]
    fn test_search_deterministic() {
        let mut manifest = ChunkManifest::new();
        manifest.ingest_file("a.py", 1.0, &py_chunks("def foo():\n    shared()\n"));
        manifest.ingest_file("b.py", 1.0, &py_chunks("def bar():\n    shared()\n"));

        let first = manifest.search("shared", 10, &SearchFilters::default());
        let second = manifest.search("shared", 10, &SearchFilters::default());
        assert_eq!(first, second);
        // Equal scores break ties by ascending chunk ID.
        assert!(first[0].chunk_id < first[1].chunk_id);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");

        let mut manifest = ChunkManifest::new();
        manifest.ingest_file("a.py", 1.5, &py_chunks("def foo():\n    return 1\n"));
        manifest.rebuild_index();
        manifest.save(&path).unwrap();

        let mut loaded = ChunkManifest::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.chunk_ids(), manifest.chunk_ids());
        assert_eq!(loaded.source_paths(), manifest.source_paths());
        assert!(!loaded.needs_ingest("a.py", 1.5));

        let hits = loaded.search("foo", 5, &SearchFilters::default());
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_load_prunes_dangling_references() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("manifest.json");

        let mut manifest = ChunkManifest::new();
        manifest.ingest_file("a.py", 1.0, &py_chunks("def foo():\n    return 1\n"));
        manifest.rebuild_index();
        // Corrupt: a location set naming a chunk that does not exist.
        manifest
            .source_to_chunks
            .insert("ghost.py".to_string(), {
                let mut s = BTreeSet::new();
                s.insert("chunk_0000000000000000".to_string());
                s
            });
        manifest.save(&path).unwrap();

        let loaded = ChunkManifest::load(&path).unwrap();
        assert!(loaded.is_index_dirty());
        assert!(!loaded.source_paths().contains(&"ghost.py".to_string()));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let tmp = TempDir::new().unwrap();
        let manifest = ChunkManifest::load_or_default(&tmp.path().join("none.json")).unwrap();
        assert!(manifest.is_empty());
    }
}
