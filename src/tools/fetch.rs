//! HTTP fetch tool: GET with size and time caps.

use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use super::{Tool, ToolOutcome, parse_args, schema};
use crate::error::ToolError;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default response size cap in bytes.
pub const DEFAULT_MAX_BYTES: u64 = 512 * 1024;

#[derive(Debug, Deserialize)]
struct FetchParams {
    url: String,
}

/// HTTP GET with caps on response time and size.
pub struct FetchTool {
    agent: ureq::Agent,
    max_bytes: u64,
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_MAX_BYTES)
    }
}

impl FetchTool {
    /// Creates the tool with explicit caps.
    #[must_use]
    pub fn new(timeout: Duration, max_bytes: u64) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent, max_bytes }
    }
}

impl Tool for FetchTool {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn description(&self) -> &'static str {
        "HTTP GET a URL with time and size caps, returning the body as text"
    }

    fn parameters(&self) -> Value {
        schema::object(&[("url", schema::string("URL to fetch (http or https)"))], &["url"])
    }

    fn execute(&self, arguments: &Value) -> ToolOutcome {
        let params: FetchParams = parse_args(arguments)?;
        if !params.url.starts_with("http://") && !params.url.starts_with("https://") {
            return Err(ToolError::rules(
                "RULE_VIOLATION",
                format!("only http(s) URLs are fetchable: {}", params.url),
            ));
        }

        let mut response = self
            .agent
            .get(&params.url)
            .call()
            .map_err(|e| ToolError::runtime("FETCH_FAILED", e.to_string()))?;

        let status = response.status();
        let mut buf = Vec::new();
        response
            .body_mut()
            .as_reader()
            .take(self.max_bytes + 1)
            .read_to_end(&mut buf)
            .map_err(|e| ToolError::runtime("FETCH_FAILED", e.to_string()))?;

        if buf.len() as u64 > self.max_bytes {
            return Err(ToolError::runtime(
                "FETCH_TOO_LARGE",
                format!(
                    "response for {} exceeds the {} byte cap",
                    params.url, self.max_bytes
                ),
            ));
        }

        let body = String::from_utf8_lossy(&buf);
        Ok(format!("status: {status}\n\n{body}"))
    }
}
