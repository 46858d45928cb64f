//! Tokenization, search filters, and snippet extraction for keyword
//! retrieval.
//!
//! The inverted index maps token to a sorted, duplicate-free list of chunk
//! IDs. Sorted postings make intersection deterministic, which keeps
//! repeated searches byte-identical.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

use super::chunker::ChunkType;

/// Minimum token length retained by the tokenizer.
const MIN_TOKEN_LEN: usize = 2;

/// Maximum snippet length in bytes (trimmed to a grapheme boundary).
const SNIPPET_MAX_LEN: usize = 160;

/// Lowercases and splits text into index tokens.
///
/// Splits on every non-alphanumeric character (which covers underscore and
/// dot) and keeps tokens of length ≥ 2.
///
/// # Examples
///
/// ```
/// use codeloom::store::index::tokenize;
///
/// assert_eq!(tokenize("foo_bar.baz"), vec!["foo", "bar", "baz"]);
/// assert_eq!(tokenize("a B cc"), vec!["cc"]);
/// ```
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= MIN_TOKEN_LEN)
        .collect()
}

/// Unique tokens of a text, sorted.
#[must_use]
pub fn unique_tokens(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Counts occurrences of `token` among the tokens of `content`.
#[must_use]
pub fn occurrence_count(content: &str, token: &str) -> usize {
    tokenize(content).iter().filter(|t| t.as_str() == token).count()
}

/// Filters applied to keyword search candidates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Keep chunks whose source path starts with this prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Keep chunks whose source path ends with this suffix (file type).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Keep chunks of this structural kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
    /// Keep chunks whose tag set contains all of these.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl SearchFilters {
    /// Whether any filter is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.path_prefix.is_none()
            && self.file_type.is_none()
            && self.chunk_type.is_none()
            && self.tags.is_empty()
    }

    /// Applies the filters to one candidate's metadata.
    #[must_use]
    pub fn accepts(
        &self,
        source_path: &str,
        chunk_type: ChunkType,
        tags: &BTreeSet<String>,
    ) -> bool {
        if let Some(prefix) = &self.path_prefix
            && !source_path.starts_with(prefix.as_str())
        {
            return false;
        }
        if let Some(suffix) = &self.file_type
            && !source_path.ends_with(suffix.as_str())
        {
            return false;
        }
        if let Some(required) = self.chunk_type
            && chunk_type != required
        {
            return false;
        }
        self.tags.iter().all(|t| tags.contains(t))
    }
}

/// One retrieval hit with the chunk metadata a citation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Content-derived chunk ID (the citation unit).
    pub chunk_id: String,
    /// Retrieval score (occurrence sum for keyword, cosine for vector,
    /// fused reciprocal-rank for hybrid).
    pub score: f64,
    /// Source path of the chunk's first sighting.
    pub source_path: String,
    /// First line, 1-based.
    pub start_line: usize,
    /// Last line, 1-based inclusive.
    pub end_line: usize,
    /// Structural kind.
    pub chunk_type: ChunkType,
    /// Callable or section name, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Bounded snippet around the first query match.
    pub snippet: String,
}

/// Extracts a bounded snippet around the first occurrence of any query
/// token, trimmed to grapheme boundaries.
#[must_use]
pub fn extract_snippet(content: &str, query_tokens: &[String]) -> String {
    let lower = content.to_lowercase();
    let first_match = query_tokens
        .iter()
        .filter_map(|t| lower.find(t.as_str()))
        .min()
        .unwrap_or(0);

    // Lowercasing can shift byte offsets for non-ASCII text; clamp the
    // anchor to a valid boundary in the original content.
    let mut anchor = first_match.min(content.len());
    while anchor > 0 && !content.is_char_boundary(anchor) {
        anchor -= 1;
    }

    // Rewind to the start of the matched line for readable context.
    let line_start = content[..anchor].rfind('\n').map_or(0, |p| p + 1);
    let window = &content[line_start..];
    bounded_graphemes(window, SNIPPET_MAX_LEN)
}

/// Truncates text to at most `max_len` bytes on a grapheme boundary,
/// appending an ellipsis when shortened.
#[must_use]
pub fn bounded_graphemes(text: &str, max_len: usize) -> String {
    let trimmed = text.trim_end();
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }
    let mut out = String::with_capacity(max_len + 1);
    for grapheme in trimmed.graphemes(true) {
        if out.len() + grapheme.len() > max_len {
            break;
        }
        out.push_str(grapheme);
    }
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_lowercases_and_splits() {
        assert_eq!(tokenize("Hello World"), vec!["hello", "world"]);
        assert_eq!(tokenize("foo_bar.baz"), vec!["foo", "bar", "baz"]);
        assert_eq!(tokenize("a-b+c"), Vec::<String>::new());
        assert_eq!(tokenize("fn main() {}"), vec!["fn", "main"]);
    }

    #[test]
    fn test_tokenize_min_length() {
        assert_eq!(tokenize("a b c dd"), vec!["dd"]);
    }

    #[test]
    fn test_tokenize_empty() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("  \t\n").is_empty());
    }

    #[test]
    fn test_unique_tokens_sorted() {
        let tokens: Vec<String> = unique_tokens("beta alpha beta").into_iter().collect();
        assert_eq!(tokens, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_occurrence_count() {
        assert_eq!(occurrence_count("foo bar foo foo_baz", "foo"), 3);
        assert_eq!(occurrence_count("foo bar", "missing"), 0);
    }

    #[test]
    fn test_filters_accept_all_when_empty() {
        let filters = SearchFilters::default();
        assert!(filters.is_empty());
        assert!(filters.accepts("src/a.py", ChunkType::Function, &BTreeSet::new()));
    }

    #[test]
    fn test_filters_path_prefix_and_suffix() {
        let filters = SearchFilters {
            path_prefix: Some("src/".to_string()),
            file_type: Some(".py".to_string()),
            ..Default::default()
        };
        assert!(filters.accepts("src/a.py", ChunkType::Function, &BTreeSet::new()));
        assert!(!filters.accepts("lib/a.py", ChunkType::Function, &BTreeSet::new()));
        assert!(!filters.accepts("src/a.rs", ChunkType::Function, &BTreeSet::new()));
    }

    #[test]
    fn test_filters_chunk_type_and_tags() {
        let mut tags = BTreeSet::new();
        tags.insert("core".to_string());
        let filters = SearchFilters {
            chunk_type: Some(ChunkType::Class),
            tags: tags.clone(),
            ..Default::default()
        };
        let mut chunk_tags = BTreeSet::new();
        chunk_tags.insert("core".to_string());
        chunk_tags.insert("extra".to_string());
        assert!(filters.accepts("a.py", ChunkType::Class, &chunk_tags));
        assert!(!filters.accepts("a.py", ChunkType::Function, &chunk_tags));
        assert!(!filters.accepts("a.py", ChunkType::Class, &BTreeSet::new()));
    }

    #[test]
    fn test_snippet_starts_at_match_line() {
        let content = "line one\nline two has needle here\nline three\n";
        let snippet = extract_snippet(content, &["needle".to_string()]);
        assert!(snippet.starts_with("line two"));
    }

    #[test]
    fn test_snippet_bounded() {
        let long_line = "x".repeat(500);
        let snippet = extract_snippet(&long_line, &["zz".to_string()]);
        assert!(snippet.len() <= SNIPPET_MAX_LEN + '…'.len_utf8());
        assert!(snippet.ends_with('…'));
    }

    #[test]
    fn test_bounded_graphemes_respects_boundaries() {
        let text = "héllo wörld";
        let bounded = bounded_graphemes(text, 6);
        assert!(bounded.ends_with('…'));
        // No broken UTF-8: the result is a valid string by construction,
        // and every grapheme is intact.
        assert!(text.starts_with(bounded.trim_end_matches('…')));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Tokens are always lowercase, alphanumeric, and ≥ 2 chars.
            #[test]
            fn tokens_well_formed(text in ".{0,200}") {
                for token in tokenize(&text) {
                    prop_assert!(token.chars().count() >= 2);
                    prop_assert_eq!(token.to_lowercase(), token.clone());
                }
            }

            /// Tokenization is deterministic.
            #[test]
            fn tokenize_deterministic(text in ".{0,200}") {
                prop_assert_eq!(tokenize(&text), tokenize(&text));
            }
        }
    }
}
