#![deny(unsafe_code)]
#![warn(missing_docs)]
//! Client tool registry and built-in coding tools.
//!
//! Tools are `{schema, handler}` records in a name-keyed map. A handler
//! returns a list of text items; [`ToolRegistry::invoke`] wraps that list
//! into the two-element tuple the upstream server destructures as
//! `[resultObj, error]`, catches handler failures as `Error: …` text, and
//! truncates every text item to the output limit. A tool call never kills
//! the session.

mod context;
mod registry;

mod create_directory;
mod create_file;
mod file_search;
mod get_errors;
mod grep_search;
mod list_dir;
mod read_file;
mod replace_string;
mod run_in_terminal;
mod workspace_symbols;

pub use context::{DocumentSink, NullDocumentSink, ToolContext};
pub use registry::{truncate_output, wrap_error, wrap_success, ToolRegistry, TOOL_OUTPUT_LIMIT};

use maestro_core::ToolSchema;
use serde_json::Value;

/// One text item of a tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolText(pub String);

impl ToolText {
    /// Create a text item.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

/// Tool execution errors. Reported to the model as `Error: …` text, never
/// propagated as a session failure.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Input did not match the tool's schema.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran but failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The tool exceeded its time budget.
    #[error("Timeout after {0}s")]
    Timeout(u64),
}

/// Result type for tool handlers.
pub type ToolResult = Result<Vec<ToolText>, ToolError>;

/// A client-side tool: a schema and an async handler.
#[async_trait::async_trait]
pub trait ClientTool: Send + Sync {
    /// Registration schema (name, description, input schema).
    fn schema(&self) -> ToolSchema;

    /// Execute with the given input.
    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

/// Fetch a required string field from a tool input object.
pub(crate) fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{field}'")))
}
