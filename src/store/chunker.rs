//! Deterministic source chunking.
//!
//! Chunking is per language family. Function-bearing languages yield one
//! chunk per top-level function and one per top-level class; section-bearing
//! markup splits at headers; everything else is a single whole-file chunk.
//! The same input always produces the same chunks, which is what makes
//! content-hash chunk IDs stable citation units.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Structural kind of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    /// Top-level callable unit.
    Function,
    /// Top-level class / type definition block.
    Class,
    /// Markup section delimited by headers.
    Section,
    /// Whole file.
    File,
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Section => "section",
            Self::File => "file",
        };
        f.write_str(s)
    }
}

/// One chunk fresh out of the chunker, before manifest registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceChunk {
    /// Chunk body. Lines joined with `\n` and a trailing newline.
    pub content: String,
    /// First line of the chunk, 1-based.
    pub start_line: usize,
    /// Last line of the chunk, 1-based inclusive.
    pub end_line: usize,
    /// Structural kind.
    pub chunk_type: ChunkType,
    /// Captured callable or section title, when applicable.
    pub name: Option<String>,
}

/// Language family driving the chunking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Python,
    Rust,
    JavaScript,
    Go,
    Markdown,
    Plain,
}

impl Family {
    fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        match ext.as_str() {
            "py" | "pyw" | "pyi" => Self::Python,
            "rs" => Self::Rust,
            "js" | "mjs" | "cjs" | "jsx" | "ts" | "tsx" | "mts" | "cts" => Self::JavaScript,
            "go" => Self::Go,
            "md" | "markdown" => Self::Markdown,
            _ => Self::Plain,
        }
    }
}

/// A top-level construct boundary found in a function-bearing file.
#[derive(Debug, Clone)]
struct Construct {
    /// 0-based line index of the construct head.
    line_idx: usize,
    chunk_type: ChunkType,
    name: Option<String>,
}

macro_rules! static_regex {
    ($name:ident, $pattern:expr) => {{
        static $name: OnceLock<Regex> = OnceLock::new();
        $name.get_or_init(|| Regex::new($pattern).expect("valid regex"))
    }};
}

/// Chunks a source file deterministically according to its language family.
///
/// Returns an empty vector for empty input.
#[must_use]
pub fn chunk_source(path: &Path, text: &str) -> Vec<SourceChunk> {
    if text.is_empty() {
        return Vec::new();
    }
    let lines: Vec<&str> = text.lines().collect();
    match Family::from_path(path) {
        Family::Markdown => chunk_sections(&lines),
        Family::Plain => vec![whole_file_chunk(&lines)],
        family => {
            let constructs = find_constructs(&lines, family);
            if constructs.is_empty() {
                // Module-level residual becomes a single file chunk only
                // when no functions or classes were found.
                vec![whole_file_chunk(&lines)]
            } else {
                chunk_constructs(&lines, &constructs)
            }
        }
    }
}

fn whole_file_chunk(lines: &[&str]) -> SourceChunk {
    SourceChunk {
        content: join_lines(lines),
        start_line: 1,
        end_line: lines.len().max(1),
        chunk_type: ChunkType::File,
        name: None,
    }
}

fn join_lines(lines: &[&str]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Trims trailing blank lines from a 0-based inclusive span, keeping at
/// least the first line.
fn trim_span(lines: &[&str], start: usize, mut end: usize) -> usize {
    while end > start && lines[end].trim().is_empty() {
        end -= 1;
    }
    end
}

fn chunk_constructs(lines: &[&str], constructs: &[Construct]) -> Vec<SourceChunk> {
    let mut chunks = Vec::with_capacity(constructs.len());
    for (i, construct) in constructs.iter().enumerate() {
        let start = construct.line_idx;
        let end_exclusive = constructs
            .get(i + 1)
            .map_or(lines.len(), |next| next.line_idx);
        if end_exclusive == 0 || start >= end_exclusive {
            continue;
        }
        let end = trim_span(lines, start, end_exclusive - 1);
        chunks.push(SourceChunk {
            content: join_lines(&lines[start..=end]),
            start_line: start + 1,
            end_line: end + 1,
            chunk_type: construct.chunk_type,
            name: construct.name.clone(),
        });
    }
    chunks
}

fn chunk_sections(lines: &[&str]) -> Vec<SourceChunk> {
    let header = static_regex!(MD_HEADER, r"^#{1,6}\s+(.+?)\s*$");
    let mut heads: Vec<(usize, Option<String>)> = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some(caps) = header.captures(line) {
            heads.push((idx, caps.get(1).map(|m| m.as_str().to_string())));
        }
    }
    if heads.is_empty() {
        return vec![whole_file_chunk(lines)];
    }

    let mut chunks = Vec::new();
    // Preamble before the first header is an unnamed section.
    if heads[0].0 > 0 {
        let end = trim_span(lines, 0, heads[0].0 - 1);
        let content = join_lines(&lines[0..=end]);
        if !content.trim().is_empty() {
            chunks.push(SourceChunk {
                content,
                start_line: 1,
                end_line: end + 1,
                chunk_type: ChunkType::Section,
                name: None,
            });
        }
    }
    for (i, (start, name)) in heads.iter().enumerate() {
        let end_exclusive = heads.get(i + 1).map_or(lines.len(), |(next, _)| *next);
        let end = trim_span(lines, *start, end_exclusive - 1);
        chunks.push(SourceChunk {
            content: join_lines(&lines[*start..=end]),
            start_line: start + 1,
            end_line: end + 1,
            chunk_type: ChunkType::Section,
            name: name.clone(),
        });
    }
    chunks
}

fn find_constructs(lines: &[&str], family: Family) -> Vec<Construct> {
    let mut constructs = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if let Some((chunk_type, name)) = match_construct(line, family) {
            constructs.push(Construct {
                line_idx: idx,
                chunk_type,
                name,
            });
        }
    }
    constructs
}

/// Matches a top-level (column 0) construct head for the given language.
fn match_construct(line: &str, family: Family) -> Option<(ChunkType, Option<String>)> {
    let capture = |re: &Regex, line: &str| -> Option<String> {
        re.captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };
    match family {
        Family::Python => {
            let func = static_regex!(PY_FN, r"^(?:async\s+)?def\s+(\w+)");
            let class = static_regex!(PY_CLASS, r"^class\s+(\w+)");
            if let Some(name) = capture(func, line) {
                return Some((ChunkType::Function, Some(name)));
            }
            if let Some(name) = capture(class, line) {
                return Some((ChunkType::Class, Some(name)));
            }
            None
        }
        Family::Rust => {
            let func = static_regex!(
                RS_FN,
                r"^(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(?:extern\s+\S+\s+)?fn\s+(\w+)"
            );
            let class = static_regex!(
                RS_TYPE,
                r"^(?:pub(?:\([^)]*\))?\s+)?(?:struct|enum|trait|union)\s+(\w+)"
            );
            let imp = static_regex!(
                RS_IMPL,
                r"^(?:unsafe\s+)?impl(?:<[^>]*>)?\s+(?:\w+(?:<[^>]*>)?\s+for\s+)?(\w+)"
            );
            if let Some(name) = capture(func, line) {
                return Some((ChunkType::Function, Some(name)));
            }
            if let Some(name) = capture(class, line) {
                return Some((ChunkType::Class, Some(name)));
            }
            if let Some(name) = capture(imp, line) {
                return Some((ChunkType::Class, Some(name)));
            }
            None
        }
        Family::JavaScript => {
            let func = static_regex!(
                JS_FN,
                r"^(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*(\w+)"
            );
            let arrow = static_regex!(
                JS_ARROW,
                r"^(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?\([^)]*\)\s*(?::[^=]+)?=>"
            );
            let class = static_regex!(JS_CLASS, r"^(?:export\s+)?(?:abstract\s+)?class\s+(\w+)");
            if let Some(name) = capture(func, line) {
                return Some((ChunkType::Function, Some(name)));
            }
            if let Some(name) = capture(arrow, line) {
                return Some((ChunkType::Function, Some(name)));
            }
            if let Some(name) = capture(class, line) {
                return Some((ChunkType::Class, Some(name)));
            }
            None
        }
        Family::Go => {
            let func = static_regex!(GO_FN, r"^func\s+(?:\([^)]+\)\s*)?(\w+)");
            let class = static_regex!(GO_TYPE, r"^type\s+(\w+)\s+(?:struct|interface)");
            if let Some(name) = capture(func, line) {
                return Some((ChunkType::Function, Some(name)));
            }
            if let Some(name) = capture(class, line) {
                return Some((ChunkType::Class, Some(name)));
            }
            None
        }
        Family::Markdown | Family::Plain => None,
    }
}
