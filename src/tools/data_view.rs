//! Columnar data viewer: `head`, `tail`, `shape`, and `columns` over
//! delimited and JSONL files.
//!
//! `shape` and `columns` stream the file line by line and read only the
//! header for column information; the payload is never loaded whole.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::files::MAX_READ_BYTES;
use super::{Tool, ToolOutcome, parse_args, schema};
use crate::error::{SandboxError, ToolError};
use crate::sandbox::Sandbox;

/// Default row count for `head`/`tail`.
const DEFAULT_N: usize = 10;

#[derive(Debug, Deserialize)]
struct DataViewParams {
    path: String,
    op: String,
    #[serde(default)]
    n: Option<usize>,
}

/// Detected tabular format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Csv,
    Tsv,
    Jsonl,
}

impl Format {
    fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "tsv" => Some(Self::Tsv),
            "jsonl" | "ndjson" => Some(Self::Jsonl),
            _ => None,
        }
    }

    const fn delimiter(self) -> char {
        match self {
            Self::Csv => ',',
            Self::Tsv => '\t',
            Self::Jsonl => '\n',
        }
    }
}

/// Head/tail/shape/columns over columnar files.
pub struct DataViewTool {
    sandbox: Arc<Sandbox>,
}

impl DataViewTool {
    /// Creates the tool over a sandbox handle.
    #[must_use]
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }

    fn open(&self, path: &str) -> std::result::Result<(BufReader<std::fs::File>, Format), ToolError> {
        let resolved = match self.sandbox.resolve_read(path) {
            Ok(p) if p.exists() => p,
            Ok(_) => self.sandbox.resolve_project_read(path)?,
            Err(err @ SandboxError::BlockedPath { .. }) => return Err(err.into()),
            Err(_) => self.sandbox.resolve_project_read(path)?,
        };
        if !resolved.is_file() {
            return Err(SandboxError::NotAFile {
                path: path.to_string(),
            }
            .into());
        }
        let format = Format::from_path(&resolved).ok_or_else(|| {
            ToolError::runtime(
                "UNSUPPORTED_FORMAT",
                format!("{path} is not a csv/tsv/jsonl file"),
            )
        })?;
        let file = std::fs::File::open(&resolved)
            .map_err(|e| ToolError::runtime("READ_FAILED", e.to_string()))?;
        Ok((BufReader::new(file), format))
    }
}

impl Tool for DataViewTool {
    fn name(&self) -> &'static str {
        "data_view"
    }

    fn description(&self) -> &'static str {
        "Inspect a columnar file (csv/tsv/jsonl): head, tail, shape, or columns"
    }

    fn parameters(&self) -> Value {
        schema::object(
            &[
                ("path", schema::string("Data file, relative to the workspace or project root")),
                (
                    "op",
                    schema::string_enum("Operation", &["head", "tail", "shape", "columns"]),
                ),
                ("n", schema::integer("Row count for head/tail (default 10)")),
            ],
            &["path", "op"],
        )
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: DataViewParams = parse_args(arguments)?;
        let (reader, format) = self.open(&params.path)?;
        let n = params.n.unwrap_or(DEFAULT_N);

        match params.op.as_str() {
            "head" => head(reader, n),
            "tail" => tail(reader, n),
            "shape" => shape(reader, format),
            "columns" => columns(reader, format),
            other => Err(ToolError::rules(
                "SCHEMA_VIOLATION",
                format!("unknown op: {other}"),
            )),
        }
    }
}

fn read_lines_capped(
    reader: BufReader<std::fs::File>,
) -> impl Iterator<Item = std::io::Result<String>> {
    // Cap each line to the read budget so a pathological file cannot
    // balloon memory.
    reader.take(MAX_READ_BYTES * 4).lines()
}

fn head(reader: BufReader<std::fs::File>, n: usize) -> ToolOutcome {
    let mut out = Vec::with_capacity(n);
    for line in read_lines_capped(reader).take(n) {
        out.push(line.map_err(|e| ToolError::runtime("READ_FAILED", e.to_string()))?);
    }
    Ok(out.join("\n"))
}

fn tail(reader: BufReader<std::fs::File>, n: usize) -> ToolOutcome {
    let mut window = std::collections::VecDeque::with_capacity(n + 1);
    for line in read_lines_capped(reader) {
        let line = line.map_err(|e| ToolError::runtime("READ_FAILED", e.to_string()))?;
        window.push_back(line);
        if window.len() > n {
            window.pop_front();
        }
    }
    Ok(window.into_iter().collect::<Vec<_>>().join("\n"))
}

fn shape(reader: BufReader<std::fs::File>, format: Format) -> ToolOutcome {
    let mut rows = 0usize;
    let mut cols = 0usize;
    for (idx, line) in read_lines_capped(reader).enumerate() {
        let line = line.map_err(|e| ToolError::runtime("READ_FAILED", e.to_string()))?;
        if line.trim().is_empty() {
            continue;
        }
        if idx == 0 {
            cols = match format {
                Format::Jsonl => serde_json::from_str::<serde_json::Map<String, Value>>(&line)
                    .map(|m| m.len())
                    .unwrap_or(0),
                delimited => line.split(delimited.delimiter()).count(),
            };
        }
        rows += 1;
    }
    // The header line is not a data row for delimited formats.
    if matches!(format, Format::Csv | Format::Tsv) {
        rows = rows.saturating_sub(1);
    }
    Ok(format!("rows: {rows}\ncolumns: {cols}"))
}

fn columns(reader: BufReader<std::fs::File>, format: Format) -> ToolOutcome {
    let first = read_lines_capped(reader)
        .next()
        .transpose()
        .map_err(|e| ToolError::runtime("READ_FAILED", e.to_string()))?
        .unwrap_or_default();
    if first.trim().is_empty() {
        return Ok("(no columns)".to_string());
    }
    let names: Vec<String> = match format {
        Format::Jsonl => serde_json::from_str::<serde_json::Map<String, Value>>(&first)
            .map(|m| m.keys().cloned().collect())
            .map_err(|e| {
                ToolError::runtime("INVALID_ENCODING", format!("first line is not JSON: {e}"))
            })?,
        delimited => first
            .split(delimited.delimiter())
            .map(|s| s.trim().to_string())
            .collect(),
    };
    Ok(names.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxConfig;
    use serde_json::json;
    use tempfile::TempDir;

    fn tool_with_file(name: &str, content: &str) -> (TempDir, DataViewTool) {
        let tmp = TempDir::new().unwrap();
        let ws = tmp.path().join("project").join("workspace");
        let sandbox = Arc::new(Sandbox::new(&ws, SandboxConfig::default()).unwrap());
        std::fs::write(sandbox.workspace_root().join(name), content).unwrap();
        (tmp, DataViewTool::new(sandbox))
    }

    const CSV: &str = "name,age,city\nada,36,london\ngrace,45,nyc\nalan,41,cambridge\n";

    #[test]
    fn test_head() {
        let (_tmp, tool) = tool_with_file("d.csv", CSV);
        let out = tool
            .execute(&json!({"path": "d.csv", "op": "head", "n": 2}))
            .unwrap();
        assert_eq!(out, "name,age,city\nada,36,london");
    }

    #[test]
    fn test_tail() {
        let (_tmp, tool) = tool_with_file("d.csv", CSV);
        let out = tool
            .execute(&json!({"path": "d.csv", "op": "tail", "n": 1}))
            .unwrap();
        assert_eq!(out, "alan,41,cambridge");
    }

    #[test]
    fn test_shape_excludes_header() {
        let (_tmp, tool) = tool_with_file("d.csv", CSV);
        let out = tool
            .execute(&json!({"path": "d.csv", "op": "shape"}))
            .unwrap();
        assert_eq!(out, "rows: 3\ncolumns: 3");
    }

    #[test]
    fn test_columns_csv() {
        let (_tmp, tool) = tool_with_file("d.csv", CSV);
        let out = tool
            .execute(&json!({"path": "d.csv", "op": "columns"}))
            .unwrap();
        assert_eq!(out, "name\nage\ncity");
    }

    #[test]
    fn test_jsonl_shape_and_columns() {
        let jsonl = "{\"a\": 1, \"b\": 2}\n{\"a\": 3, \"b\": 4}\n";
        let (_tmp, tool) = tool_with_file("d.jsonl", jsonl);

        let out = tool
            .execute(&json!({"path": "d.jsonl", "op": "shape"}))
            .unwrap();
        assert_eq!(out, "rows: 2\ncolumns: 2");

        let out = tool
            .execute(&json!({"path": "d.jsonl", "op": "columns"}))
            .unwrap();
        assert_eq!(out, "a\nb");
    }

    #[test]
    fn test_unsupported_format() {
        let (_tmp, tool) = tool_with_file("d.parquet", "binary");
        let err = tool
            .execute(&json!({"path": "d.parquet", "op": "head"}))
            .unwrap_err();
        assert_eq!(err.code, "UNSUPPORTED_FORMAT");
    }

    #[test]
    fn test_missing_file() {
        let (_tmp, tool) = tool_with_file("d.csv", CSV);
        let err = tool
            .execute(&json!({"path": "absent.csv", "op": "head"}))
            .unwrap_err();
        assert_eq!(err.code, "FILE_NOT_FOUND");
    }

    #[test]
    fn test_bad_op_rejected_by_schema() {
        let (_tmp, tool) = tool_with_file("d.csv", CSV);
        // The registry enforces the enum; direct execution still refuses.
        let err = tool
            .execute(&json!({"path": "d.csv", "op": "transpose"}))
            .unwrap_err();
        assert_eq!(err.code, "SCHEMA_VIOLATION");
    }
}
