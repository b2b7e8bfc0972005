//! Workspace-wide symbol search, via the LSP bridge.

use std::collections::BTreeSet;
use std::path::Path;

use maestro_core::{language_id_for_path, ToolSchema};
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::{required_str, ClientTool, ToolResult, ToolText};

/// LSP `SymbolKind` → label, indexed by `kind - 1`.
const SYMBOL_KINDS: &[&str] = &[
    "File",
    "Module",
    "Namespace",
    "Package",
    "Class",
    "Method",
    "Property",
    "Field",
    "Constructor",
    "Enum",
    "Interface",
    "Function",
    "Variable",
    "Constant",
    "String",
    "Number",
    "Boolean",
    "Array",
    "Object",
    "Key",
    "Null",
    "EnumMember",
    "Struct",
    "Event",
    "Operator",
    "TypeParameter",
];

pub(crate) struct SearchWorkspaceSymbols;

#[async_trait::async_trait]
impl ClientTool for SearchWorkspaceSymbols {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "search_workspace_symbols",
            "Search for symbol definitions (functions, classes, types) across the workspace.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The symbol name or prefix to search for."},
                },
                "required": ["query"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let query = required_str(&input, "query")?;

        let Some(lsp) = &ctx.lsp else {
            return Ok(vec![ToolText::new(
                "No language server available for symbol search.",
            )]);
        };

        let mut lines = Vec::new();
        for language in workspace_languages(&ctx.workspace_root) {
            let Some(server) = lsp.server_for_language(&language).await else {
                continue;
            };
            for symbol in server.workspace_symbols(query).await {
                lines.push(format_symbol(&symbol));
            }
        }

        if lines.is_empty() {
            lines.push(format!("No symbols found for '{query}'."));
        }
        Ok(vec![ToolText::new(lines.join("\n"))])
    }
}

/// Distinct language ids present in the workspace (bounded walk).
fn workspace_languages(root: &Path) -> Vec<String> {
    let mut languages = BTreeSet::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        if languages.len() >= 10 {
            break;
        }
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if path.is_dir() {
                if !name.starts_with('.')
                    && !crate::file_search::SKIP_DIRS.contains(&name.as_str())
                {
                    stack.push(path);
                }
            } else if let Some(lang) = language_id_for_path(&path) {
                languages.insert(lang.to_string());
            }
        }
    }
    languages.into_iter().collect()
}

fn format_symbol(symbol: &Value) -> String {
    let name = symbol.get("name").and_then(Value::as_str).unwrap_or("?");
    let kind = symbol
        .get("kind")
        .and_then(Value::as_u64)
        .and_then(|k| SYMBOL_KINDS.get((k as usize).saturating_sub(1)))
        .unwrap_or(&"Symbol");
    let location = &symbol["location"];
    let uri = location.get("uri").and_then(Value::as_str).unwrap_or("");
    let line = location["range"]["start"]
        .get("line")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    format!("{name} ({kind}) at {uri}:{line}")
}
