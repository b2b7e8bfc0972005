//! Tool registry and the upstream result-wrapping contract.

use std::collections::HashMap;
use std::sync::Arc;

use maestro_config::ToolSelection;
use maestro_core::ToolSchema;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::context::ToolContext;
use crate::{ClientTool, ToolText};

/// Maximum characters of tool output returned to the model.
pub const TOOL_OUTPUT_LIMIT: usize = 4_000;

/// Name-keyed map of client tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ClientTool>>,
}

impl ToolRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in tool.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::read_file::ReadFile));
        registry.register(Arc::new(crate::create_file::CreateFile));
        registry.register(Arc::new(crate::create_directory::CreateDirectory));
        registry.register(Arc::new(crate::replace_string::ReplaceStringInFile));
        registry.register(Arc::new(crate::list_dir::ListDir));
        registry.register(Arc::new(crate::file_search::FileSearch));
        registry.register(Arc::new(crate::grep_search::GrepSearch));
        registry.register(Arc::new(crate::run_in_terminal::RunInTerminal));
        registry.register(Arc::new(crate::get_errors::GetErrors));
        registry.register(Arc::new(crate::workspace_symbols::SearchWorkspaceSymbols));
        registry
    }

    /// Register a tool. Names are unique; re-registering replaces.
    pub fn register(&mut self, tool: Arc<dyn ClientTool>) {
        let name = tool.schema().name;
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "replacing previously registered tool");
        }
    }

    /// A copy holding only the tools the selection allows.
    #[must_use]
    pub fn filtered(&self, selection: &ToolSelection) -> Self {
        Self {
            tools: self
                .tools
                .iter()
                .filter(|(name, _)| selection.allows(name))
                .map(|(name, tool)| (name.clone(), tool.clone()))
                .collect(),
        }
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ClientTool>> {
        self.tools.get(name).cloned()
    }

    /// Registration schemas for every tool.
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|tool| tool.schema()).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Execute a tool and wrap its result for the upstream server.
    ///
    /// Unknown tools and handler failures come back as `Error: …` text in
    /// an `"error"`-status tuple; the call itself never fails.
    pub async fn invoke(&self, name: &str, input: Value, ctx: &ToolContext) -> Value {
        let Some(tool) = self.get(name) else {
            warn!(tool = %name, "unknown tool invoked");
            return wrap_error(&format!("Error: Unknown tool: {name}"));
        };

        debug!(tool = %name, "executing tool");
        match tool.execute(input, ctx).await {
            Ok(items) => wrap_success(&items),
            Err(e) => {
                debug!(tool = %name, error = %e, "tool failed");
                wrap_error(&format!("Error: {e}"))
            },
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

/// Wrap handler output into the tuple the upstream server destructures as
/// `[resultObj, error]`:
///
/// ```json
/// [{"content": [{"value": "…"}, …], "status": "success"}, null]
/// ```
///
/// Every text item is truncated to [`TOOL_OUTPUT_LIMIT`] characters.
#[must_use]
pub fn wrap_success(items: &[ToolText]) -> Value {
    let content: Vec<Value> = items
        .iter()
        .map(|item| json!({"value": truncate_output(&item.0)}))
        .collect();
    json!([{"content": content, "status": "success"}, null])
}

/// Wrap an error message into the same tuple shape with `"error"` status.
#[must_use]
pub fn wrap_error(message: &str) -> Value {
    json!([{"content": [{"value": truncate_output(message)}], "status": "error"}, null])
}

/// Truncate to [`TOOL_OUTPUT_LIMIT`] characters (not bytes; output must
/// stay valid UTF-8).
#[must_use]
pub fn truncate_output(text: &str) -> String {
    match text.char_indices().nth(TOOL_OUTPUT_LIMIT) {
        Some((byte_offset, _)) => text[..byte_offset].to_string(),
        None => text.to_string(),
    }
}
