//! Output formatting for CLI results.

use serde::Serialize;

use crate::error::Error;

/// Supported output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// One JSON document.
    Json,
}

impl OutputFormat {
    /// Parses a format flag, defaulting to text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

/// Renders a serializable value in the requested format, with a text
/// fallback supplied by the caller.
pub fn render<T: Serialize>(format: OutputFormat, value: &T, text: String) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Text => text,
    }
}

/// Formats an error for the terminal.
#[must_use]
pub fn format_error(error: &Error, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::json!({"error": error.to_string()}).to_string()
        }
        OutputFormat::Text => error.to_string(),
    }
}
