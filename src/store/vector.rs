//! Vector store: chunk embeddings in a dense row-major matrix.
//!
//! The store is a parallel pair: `ids[i]` names the chunk whose embedding
//! is row `i`. Upsert replaces in place; removal swaps with the last row
//! and shrinks. Persistence is two files written atomically: a JSON ids
//! file carrying `{ids, dim, embedding_format}` and a raw little-endian
//! `f32` matrix file. Load cross-checks both and fails with
//! `CORRUPTED_INDEX` on any mismatch.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::manifest::EMBEDDING_FORMAT;
use super::write_atomic;
use crate::embedding::cosine_similarity;
use crate::error::StoreError;

/// Metadata persisted alongside the ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorFileHeader {
    ids: Vec<String>,
    dim: usize,
    embedding_format: String,
}

/// Dense vector store keyed by chunk ID.
#[derive(Debug, Clone)]
pub struct VectorStore {
    ids: Vec<String>,
    data: Vec<f32>,
    dim: usize,
    embedding_format: String,
}

impl VectorStore {
    /// Creates an empty store with the given embedding dimension.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            ids: Vec::new(),
            data: Vec::new(),
            dim,
            embedding_format: EMBEDDING_FORMAT.to_string(),
        }
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The embedding dimension.
    #[must_use]
    pub const fn dim(&self) -> usize {
        self.dim
    }

    /// Stored chunk IDs, in row order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Whether a chunk has a stored vector.
    #[must_use]
    pub fn contains(&self, chunk_id: &str) -> bool {
        self.ids.iter().any(|id| id == chunk_id)
    }

    /// Returns the stored vector for a chunk, if any.
    #[must_use]
    pub fn get(&self, chunk_id: &str) -> Option<&[f32]> {
        let row = self.ids.iter().position(|id| id == chunk_id)?;
        Some(&self.data[row * self.dim..(row + 1) * self.dim])
    }

    /// Idempotent upsert: replaces the row in place when the ID exists,
    /// appends otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DimensionMismatch`] when the vector length
    /// differs from the store dimension.
    pub fn upsert(&mut self, chunk_id: &str, vector: &[f32]) -> std::result::Result<(), StoreError> {
        if vector.len() != self.dim {
            return Err(StoreError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if let Some(row) = self.ids.iter().position(|id| id == chunk_id) {
            self.data[row * self.dim..(row + 1) * self.dim].copy_from_slice(vector);
        } else {
            self.ids.push(chunk_id.to_string());
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    /// Removes a chunk's vector by swapping with the last row. Returns
    /// whether anything was removed.
    pub fn remove(&mut self, chunk_id: &str) -> bool {
        let Some(row) = self.ids.iter().position(|id| id == chunk_id) else {
            return false;
        };
        let last = self.ids.len() - 1;
        if row != last {
            self.ids.swap(row, last);
            let (head, tail) = self.data.split_at_mut(last * self.dim);
            head[row * self.dim..(row + 1) * self.dim].copy_from_slice(&tail[..self.dim]);
        }
        self.ids.pop();
        self.data.truncate(last * self.dim);
        true
    }

    /// Drops every vector, keeping the dimension.
    pub fn clear(&mut self) {
        self.ids.clear();
        self.data.clear();
    }

    /// Cosine top-K via partial selection: partition around the K-th
    /// element, then sort only the top slice. Ties break by ascending
    /// chunk ID. A query of the wrong dimension yields an empty result.
    #[must_use]
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<(String, f32)> {
        if k == 0 || query.len() != self.dim || self.ids.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f32)> = (0..self.ids.len())
            .map(|row| {
                let vec = &self.data[row * self.dim..(row + 1) * self.dim];
                (row, cosine_similarity(query, vec))
            })
            .collect();

        let cmp = |a: &(usize, f32), b: &(usize, f32)| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.ids[a.0].cmp(&self.ids[b.0]))
        };

        if scored.len() > k {
            scored.select_nth_unstable_by(k - 1, cmp);
            scored.truncate(k);
        }
        scored.sort_by(cmp);
        scored
            .into_iter()
            .map(|(row, score)| (self.ids[row].clone(), score))
            .collect()
    }

    /// Persists ids and matrix atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on serialization or I/O failure.
    pub fn save(&self, ids_path: &Path, matrix_path: &Path) -> std::result::Result<(), StoreError> {
        let header = VectorFileHeader {
            ids: self.ids.clone(),
            dim: self.dim,
            embedding_format: self.embedding_format.clone(),
        };
        let header_bytes = serde_json::to_vec_pretty(&header)?;
        write_atomic(ids_path, &header_bytes).map_err(|e| StoreError::Io {
            path: ids_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut matrix_bytes = Vec::with_capacity(self.data.len() * 4);
        for value in &self.data {
            matrix_bytes.extend_from_slice(&value.to_le_bytes());
        }
        write_atomic(matrix_path, &matrix_bytes).map_err(|e| StoreError::Io {
            path: matrix_path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Loads ids and matrix, verifying that the row count matches the id
    /// count and the dimension matches stored metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptedIndex`] when counts disagree or the
    /// matrix length is not a whole number of rows.
    pub fn load(
        ids_path: &Path,
        matrix_path: &Path,
        expected_dim: usize,
    ) -> std::result::Result<Self, StoreError> {
        let header_bytes = std::fs::read(ids_path).map_err(|e| StoreError::Io {
            path: ids_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let header: VectorFileHeader = serde_json::from_slice(&header_bytes)?;
        if header.dim != expected_dim {
            return Err(StoreError::CorruptedIndex {
                reason: format!(
                    "stored dim {} does not match expected {expected_dim}",
                    header.dim
                ),
            });
        }

        let matrix_bytes = std::fs::read(matrix_path).map_err(|e| StoreError::Io {
            path: matrix_path.display().to_string(),
            reason: e.to_string(),
        })?;
        let expected_bytes = header.ids.len() * header.dim * 4;
        if matrix_bytes.len() != expected_bytes {
            return Err(StoreError::CorruptedIndex {
                reason: format!(
                    "matrix holds {} bytes, expected {expected_bytes} for {} ids",
                    matrix_bytes.len(),
                    header.ids.len()
                ),
            });
        }

        let mut unique = std::collections::BTreeSet::new();
        if !header.ids.iter().all(|id| unique.insert(id.as_str())) {
            return Err(StoreError::CorruptedIndex {
                reason: "duplicate ids in vector store".to_string(),
            });
        }

        let data: Vec<f32> = matrix_bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        Ok(Self {
            ids: header.ids,
            data,
            dim: header.dim,
            embedding_format: header.embedding_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unit(dim: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn test_upsert_insert_and_update() {
        let mut store = VectorStore::new(3);
        store.upsert("chunk_a", &unit(3, 0)).unwrap();
        assert_eq!(store.len(), 1);

        // Update in place: length unchanged.
        store.upsert("chunk_a", &unit(3, 1)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("chunk_a").unwrap(), unit(3, 1).as_slice());

        store.upsert("chunk_b", &unit(3, 2)).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_upsert_dimension_mismatch() {
        let mut store = VectorStore::new(3);
        let err = store.upsert("chunk_a", &[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_remove_swaps_with_last() {
        let mut store = VectorStore::new(2);
        store.upsert("chunk_a", &[1.0, 0.0]).unwrap();
        store.upsert("chunk_b", &[0.0, 1.0]).unwrap();
        store.upsert("chunk_c", &[1.0, 1.0]).unwrap();

        assert!(store.remove("chunk_a"));
        assert_eq!(store.len(), 2);
        assert!(store.get("chunk_a").is_none());
        assert_eq!(store.get("chunk_c").unwrap(), &[1.0, 1.0]);
        assert_eq!(store.get("chunk_b").unwrap(), &[0.0, 1.0]);

        assert!(!store.remove("chunk_a"));
    }

    #[test]
    fn test_top_k_orders_by_similarity() {
        let mut store = VectorStore::new(2);
        store.upsert("chunk_x", &[1.0, 0.0]).unwrap();
        store.upsert("chunk_y", &[0.0, 1.0]).unwrap();
        store.upsert("chunk_z", &[0.7, 0.7]).unwrap();

        let hits = store.top_k(&[1.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, "chunk_x");
        assert_eq!(hits[1].0, "chunk_z");
    }

    #[test]
    fn test_top_k_tie_breaks_by_id() {
        let mut store = VectorStore::new(2);
        store.upsert("chunk_b", &[1.0, 0.0]).unwrap();
        store.upsert("chunk_a", &[1.0, 0.0]).unwrap();

        let hits = store.top_k(&[1.0, 0.0], 2);
        assert_eq!(hits[0].0, "chunk_a");
        assert_eq!(hits[1].0, "chunk_b");
    }

    #[test]
    fn test_top_k_boundaries() {
        let store = VectorStore::new(2);
        assert!(store.top_k(&[1.0, 0.0], 5).is_empty());

        let mut store = VectorStore::new(2);
        store.upsert("chunk_a", &[1.0, 0.0]).unwrap();
        assert!(store.top_k(&[1.0, 0.0], 0).is_empty());
        assert!(store.top_k(&[1.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let ids = tmp.path().join("vectors.ids");
        let matrix = tmp.path().join("vectors.matrix");

        let mut store = VectorStore::new(4);
        store.upsert("chunk_a", &unit(4, 0)).unwrap();
        store.upsert("chunk_b", &unit(4, 2)).unwrap();
        store.save(&ids, &matrix).unwrap();

        let loaded = VectorStore::load(&ids, &matrix, 4).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.ids(), store.ids());
        assert_eq!(loaded.get("chunk_b").unwrap(), unit(4, 2).as_slice());
    }

    #[test]
    fn test_load_detects_truncated_matrix() {
        let tmp = TempDir::new().unwrap();
        let ids = tmp.path().join("vectors.ids");
        let matrix = tmp.path().join("vectors.matrix");

        let mut store = VectorStore::new(4);
        store.upsert("chunk_a", &unit(4, 0)).unwrap();
        store.save(&ids, &matrix).unwrap();

        std::fs::write(&matrix, b"").unwrap();
        let err = VectorStore::load(&ids, &matrix, 4).unwrap_err();
        assert!(matches!(err, StoreError::CorruptedIndex { .. }));
    }

    #[test]
    fn test_load_detects_dim_skew() {
        let tmp = TempDir::new().unwrap();
        let ids = tmp.path().join("vectors.ids");
        let matrix = tmp.path().join("vectors.matrix");

        let store = VectorStore::new(4);
        store.save(&ids, &matrix).unwrap();

        let err = VectorStore::load(&ids, &matrix, 8).unwrap_err();
        assert!(matches!(err, StoreError::CorruptedIndex { .. }));
    }

    #[test]
    fn test_clear() {
        let mut store = VectorStore::new(2);
        store.upsert("chunk_a", &[1.0, 0.0]).unwrap();
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.dim(), 2);
    }
}
