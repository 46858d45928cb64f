//! Deterministic and opaque identifier generation.
//!
//! Chunk IDs are content-derived (SHA-256 prefix) so identical content
//! anywhere yields the same ID. Run/conversation IDs are opaque and unique
//! within a process lifetime. Patch and task IDs are human-orderable.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Prefix length (hex chars) taken from the SHA-256 digest for chunk IDs.
const CHUNK_HASH_PREFIX: usize = 16;

/// Computes the content-derived chunk ID: `chunk_` + first 16 hex chars of
/// SHA-256 over the chunk content.
///
/// Identical content anywhere in the project yields the same ID; location
/// is tracked separately by the manifest.
///
/// # Examples
///
/// ```
/// use codeloom::core::ids::chunk_id;
///
/// let a = chunk_id("def foo():\n    return 1\n");
/// let b = chunk_id("def foo():\n    return 1\n");
/// assert_eq!(a, b);
/// assert!(a.starts_with("chunk_"));
/// assert_eq!(a.len(), "chunk_".len() + 16);
/// ```
#[must_use]
pub fn chunk_id(content: &str) -> String {
    format!("chunk_{}", &content_hash(content)[..CHUNK_HASH_PREFIX])
}

/// Computes the full SHA-256 content hash as lowercase hex.
#[must_use]
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Generates an opaque run identifier (`run_` prefix, unique per process
/// lifetime).
#[must_use]
pub fn run_id() -> String {
    format!("run_{}", Uuid::new_v4().simple())
}

/// Generates an opaque conversation identifier (`conv_` prefix).
#[must_use]
pub fn conversation_id() -> String {
    format!("conv_{}", Uuid::new_v4().simple())
}

/// Generates an opaque tool-call identifier (`call_` prefix).
#[must_use]
pub fn tool_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// Formats a task ordinal as a queue-unique task ID (`task_NNNN`,
/// zero-padded to four digits).
#[must_use]
pub fn task_id(ordinal: u64) -> String {
    format!("task_{ordinal:04}")
}

/// Builds a patch ID from a creation time and title:
/// `YYYYMMDD_HHMMSS_<slug-of-title>`.
///
/// The slug lowercases the title, maps runs of non-alphanumerics to single
/// underscores, and truncates to 40 characters.
#[must_use]
pub fn patch_id(created_at: DateTime<Utc>, title: &str) -> String {
    format!("{}_{}", created_at.format("%Y%m%d_%H%M%S"), slug(title))
}

/// Lowercases and squashes a title into a filesystem-safe slug.
#[must_use]
pub fn slug(title: &str) -> String {
    const MAX_SLUG: usize = 40;
    let mut out = String::with_capacity(title.len().min(MAX_SLUG));
    let mut last_was_sep = true;
    for c in title.chars() {
        if out.len() >= MAX_SLUG {
            break;
        }
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("untitled");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_chunk_id_deterministic() {
        let a = chunk_id("hello world");
        let b = chunk_id("hello world");
        assert_eq!(a, b);
    }

    #[test]
    fn test_chunk_id_shape() {
        let id = chunk_id("def foo():\n    return 1\n");
        assert!(id.starts_with("chunk_"));
        assert_eq!(id.len(), 6 + 16);
        assert!(id[6..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_chunk_id_differs_on_content() {
        assert_ne!(chunk_id("a"), chunk_id("b"));
    }

    #[test]
    fn test_content_hash_is_full_sha256() {
        let h = content_hash("abc");
        assert_eq!(h.len(), 64);
        // Known SHA-256 of "abc".
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_chunk_id_is_hash_prefix() {
        let content = "some chunk body";
        assert_eq!(chunk_id(content), format!("chunk_{}", &content_hash(content)[..16]));
    }

    #[test]
    fn test_run_and_conversation_ids_unique() {
        assert!(run_id().starts_with("run_"));
        assert!(conversation_id().starts_with("conv_"));
        assert_ne!(run_id(), run_id());
        assert_ne!(conversation_id(), conversation_id());
    }

    #[test]
    fn test_task_id_zero_padded() {
        assert_eq!(task_id(1), "task_0001");
        assert_eq!(task_id(42), "task_0042");
        assert_eq!(task_id(12345), "task_12345");
    }

    #[test]
    fn test_patch_id_format() {
        let t = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 45).unwrap();
        let id = patch_id(t, "Fix the thing!");
        assert_eq!(id, "20240315_103045_fix_the_thing");
    }

    #[test]
    fn test_slug_squashes_and_truncates() {
        assert_eq!(slug("Hello,   World"), "hello_world");
        assert_eq!(slug("!!!"), "untitled");
        let long = "a".repeat(100);
        assert!(slug(&long).len() <= 40);
    }
}
