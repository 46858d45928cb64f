//! Durable chunk and vector storage.
//!
//! Everything persisted here follows one discipline: write to a sibling
//! `.tmp`, flush, fsync, then atomically rename. A crash leaves either the
//! prior contents or the next contents, never a truncated file.

pub mod chunker;
pub mod index;
pub mod manifest;
pub mod vector;

pub use chunker::{ChunkType, SourceChunk, chunk_source};
pub use index::{SearchFilters, SearchHit, tokenize};
pub use manifest::{ChunkManifest, ChunkMetadata, ChunkRecord, EMBEDDING_FORMAT, IngestOutcome};
pub use vector::VectorStore;

use std::io::Write;
use std::path::Path;

/// Writes bytes atomically: temp file, flush, fsync, rename.
///
/// # Errors
///
/// Returns the underlying I/O error.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = tmp_path(path);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map_or_else(|| std::ffi::OsString::from("file"), std::ffi::OsStr::to_os_string);
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        // No temp residue.
        assert!(!tmp.path().join("out.json.tmp").exists());
    }

    #[test]
    fn test_write_atomic_replaces_contents_fully() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("out.json");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }
}
