//! Reciprocal Rank Fusion (RRF).
//!
//! Combines multiple ranked lists into a single fused ranking.
//! Based on: Cormack, Clarke, Buettcher (2009) - "Reciprocal Rank Fusion
//! outperforms Condorcet and individual Rank Learning Methods"

use std::collections::HashMap;

/// Configuration for the RRF algorithm.
#[derive(Debug, Clone, Copy)]
pub struct RrfConfig {
    /// The k parameter controls how much weight lower-ranked items get.
    /// Higher values flatten the contribution curve. Default is 60, the
    /// value recommended in the original paper.
    pub k: u32,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self { k: 60 }
    }
}

impl RrfConfig {
    /// Creates an RRF config with the specified k value.
    #[must_use]
    pub const fn new(k: u32) -> Self {
        Self { k }
    }
}

/// Performs Reciprocal Rank Fusion over ranked lists of chunk IDs.
///
/// The RRF score for each item is `score(d) = Σ 1 / (k + rank(d))` summed
/// over every list containing `d`, with 1-based ranks. The result is
/// ordered by descending score with ascending-ID tie-break, which makes
/// fusion commutative in the order of the input lists.
///
/// # Examples
///
/// ```
/// use codeloom::retrieval::rrf::{RrfConfig, reciprocal_rank_fusion};
///
/// let keyword = vec!["chunk_a".to_string(), "chunk_b".to_string()];
/// let vector = vec!["chunk_b".to_string(), "chunk_a".to_string()];
/// let fused = reciprocal_rank_fusion(&[&keyword, &vector], RrfConfig::default());
/// assert_eq!(fused.len(), 2);
/// // Symmetric ranks tie; ascending ID breaks the tie.
/// assert_eq!(fused[0].0, "chunk_a");
/// ```
#[must_use]
pub fn reciprocal_rank_fusion(ranked_lists: &[&[String]], config: RrfConfig) -> Vec<(String, f64)> {
    let mut scores: HashMap<&str, f64> = HashMap::new();

    for list in ranked_lists {
        for (rank, item_id) in list.iter().enumerate() {
            // Ranks are 1-based in the formula; enumerate is 0-based.
            #[allow(clippy::cast_possible_truncation)]
            let rrf_score = 1.0 / f64::from(config.k + (rank as u32) + 1);
            *scores.entry(item_id.as_str()).or_insert(0.0) += rrf_score;
        }
    }

    let mut results: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| (id.to_string(), score))
        .collect();
    results.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_rrf_single_list() {
        let list = ids(&["chunk_a", "chunk_b", "chunk_c"]);
        let results = reciprocal_rank_fusion(&[&list], RrfConfig::default());

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, "chunk_a");
        assert!(results[0].1 > results[1].1);
        assert!(results[1].1 > results[2].1);
    }

    #[test]
    fn test_rrf_score_formula() {
        let list = ids(&["chunk_a"]);
        let results = reciprocal_rank_fusion(&[&list], RrfConfig::default());
        let expected = 1.0 / 61.0;
        assert!((results[0].1 - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_combined_score() {
        let list1 = ids(&["chunk_a"]);
        let list2 = ids(&["chunk_a"]);
        let results = reciprocal_rank_fusion(&[&list1, &list2], RrfConfig::default());
        let expected = 2.0 / 61.0;
        assert!((results[0].1 - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rrf_commutative_in_list_order() {
        let keyword = ids(&["chunk_a", "chunk_c", "chunk_b"]);
        let vector = ids(&["chunk_b", "chunk_a"]);

        let forward = reciprocal_rank_fusion(&[&keyword, &vector], RrfConfig::default());
        let reversed = reciprocal_rank_fusion(&[&vector, &keyword], RrfConfig::default());
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_rrf_ties_break_by_ascending_id() {
        let list1 = ids(&["chunk_b"]);
        let list2 = ids(&["chunk_a"]);
        let results = reciprocal_rank_fusion(&[&list1, &list2], RrfConfig::default());
        assert_eq!(results[0].0, "chunk_a");
        assert_eq!(results[1].0, "chunk_b");
    }

    #[test]
    fn test_rrf_empty_lists() {
        let empty: Vec<String> = Vec::new();
        let results = reciprocal_rank_fusion(&[&empty], RrfConfig::default());
        assert!(results.is_empty());
    }

    #[test]
    fn test_rrf_k_parameter() {
        let list = ids(&["chunk_a", "chunk_b"]);
        let low = reciprocal_rank_fusion(&[&list], RrfConfig::new(1));
        let high = reciprocal_rank_fusion(&[&list], RrfConfig::new(100));

        // Lower k spreads ranks further apart.
        let diff_low = low[0].1 - low[1].1;
        let diff_high = high[0].1 - high[1].1;
        assert!(diff_low > diff_high);
    }

    #[test]
    fn test_rrf_disjoint_lists() {
        let list1 = ids(&["chunk_a", "chunk_b"]);
        let list2 = ids(&["chunk_c", "chunk_d"]);
        let results = reciprocal_rank_fusion(&[&list1, &list2], RrfConfig::default());

        assert_eq!(results.len(), 4);
        let score_a = results.iter().find(|(id, _)| id == "chunk_a").unwrap().1;
        let score_c = results.iter().find(|(id, _)| id == "chunk_c").unwrap().1;
        assert!((score_a - score_c).abs() < f64::EPSILON);
    }
}
