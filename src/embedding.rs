//! Embedding gateway for semantic retrieval.
//!
//! The model-backed embedding service is a collaborator, not owned by this
//! crate; [`EmbeddingGateway`] is the seam. [`HashEmbedder`] is the
//! deterministic in-tree implementation (word and trigram hashing, unit
//! normalized): reproducible offline, lexical rather than semantic.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rayon::prelude::*;

use crate::error::StoreError;

/// Default embedding dimensions for the hash embedder.
pub const DEFAULT_DIMENSIONS: usize = 256;

/// Trait for embedding gateways.
///
/// Implementations must be thread-safe (`Send + Sync`) to support parallel
/// embedding during ingest and self-heal. All vectors from one gateway have
/// a fixed dimension.
pub trait EmbeddingGateway: Send + Sync {
    /// Returns the fixed embedding dimension.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for a single text.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmbedFailed`] if generation fails; callers
    /// treat this as soft and fall back to keyword-only retrieval.
    fn embed_single(&self, text: &str) -> std::result::Result<Vec<f32>, StoreError>;

    /// Generates embeddings for multiple texts.
    ///
    /// The default implementation embeds sequentially; implementations may
    /// override for batch backends.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::EmbedFailed`] if generation fails for any text.
    fn embed(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, StoreError> {
        texts.iter().map(|t| self.embed_single(t)).collect()
    }
}

/// Deterministic hash-based embedder.
///
/// Combines word-level hashing (vocabulary signal) with character trigram
/// hashing (fuzzy signal), normalized to unit length so cosine similarity
/// is a dot product. Identical text always embeds identically.
#[derive(Debug, Clone, Copy)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSIONS)
    }
}

impl HashEmbedder {
    /// Creates a hash embedder with the specified dimensions.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_string(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c.is_whitespace() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        // Word-level hashing (primary signal).
        for word in normalized.split_whitespace() {
            let hash = Self::hash_string(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        // Character trigram hashing (secondary signal for fuzzy matching).
        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() >= 3 {
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let hash = Self::hash_string(&trigram);
                let idx = (hash as usize) % self.dimensions;
                let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
                embedding[idx] += sign;
            }
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for val in &mut embedding {
                *val /= magnitude;
            }
        }

        embedding
    }
}

impl EmbeddingGateway for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_single(&self, text: &str) -> std::result::Result<Vec<f32>, StoreError> {
        Ok(self.generate(text))
    }

    fn embed(&self, texts: &[&str]) -> std::result::Result<Vec<Vec<f32>>, StoreError> {
        Ok(texts.par_iter().map(|text| self.generate(text)).collect())
    }
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns a value between -1.0 (opposite) and 1.0 (identical); 0.0 for
/// mismatched lengths or zero magnitude.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let embedder = HashEmbedder::default();
        let emb1 = embedder.embed_single("hello world").unwrap();
        let emb2 = embedder.embed_single("hello world").unwrap();
        assert_eq!(emb1, emb2);
    }

    #[test]
    fn test_dimensions() {
        let embedder = HashEmbedder::new(64);
        let emb = embedder.embed_single("test").unwrap();
        assert_eq!(emb.len(), 64);
        assert_eq!(embedder.dimensions(), 64);
    }

    #[test]
    fn test_normalized() {
        let embedder = HashEmbedder::default();
        let emb = embedder.embed_single("hello world").unwrap();
        let magnitude: f32 = emb.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_similar_text_higher_similarity() {
        let embedder = HashEmbedder::default();
        let base = embedder.embed_single("the quick brown fox").unwrap();
        let similar = embedder.embed_single("the quick brown dog").unwrap();
        let different = embedder.embed_single("completely unrelated text").unwrap();

        let sim_similar = cosine_similarity(&base, &similar);
        let sim_different = cosine_similarity(&base, &different);
        assert!(
            sim_similar > sim_different,
            "similar text should score higher: {sim_similar} vs {sim_different}"
        );
    }

    #[test]
    fn test_batch_embedding() {
        let embedder = HashEmbedder::default();
        let texts = vec!["hello", "world", "test"];
        let embeddings = embedder.embed(&texts).unwrap();
        assert_eq!(embeddings.len(), 3);
        for emb in &embeddings {
            assert_eq!(emb.len(), embedder.dimensions());
        }
        // Batch output matches single-text output.
        assert_eq!(embeddings[0], embedder.embed_single("hello").unwrap());
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::default();
        let emb = embedder.embed_single("").unwrap();
        assert!(emb.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_cosine_similarity_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
    }
}
