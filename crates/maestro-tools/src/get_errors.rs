//! Compiler/linter diagnostics for files, via the LSP bridge.

use maestro_core::ToolSchema;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::{ClientTool, ToolResult, ToolText};

const SEVERITIES: &[&str] = &["error", "warning", "information", "hint"];

pub(crate) struct GetErrors;

#[async_trait::async_trait]
impl ClientTool for GetErrors {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "get_errors",
            "Get compiler and linter diagnostics for one or more files.",
            json!({
                "type": "object",
                "properties": {
                    "filePaths": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Absolute paths of the files to check.",
                    },
                },
                "required": ["filePaths"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let paths: Vec<String> = input
            .get("filePaths")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let Some(lsp) = &ctx.lsp else {
            return Ok(vec![ToolText::new(
                "No diagnostics available (no language server configured).",
            )]);
        };

        let mut lines = Vec::new();
        for path_str in &paths {
            let path = ctx.resolve(path_str);
            let Ok(text) = tokio::fs::read_to_string(&path).await else {
                lines.push(format!("{path_str}: cannot read file"));
                continue;
            };
            let Some(server) = lsp.server_for_file(&path).await else {
                lines.push(format!("{path_str}: no language server for this file type"));
                continue;
            };
            let diagnostics = server.diagnostics(&path, &text).await;
            if diagnostics.is_empty() {
                lines.push(format!("{path_str}: no errors"));
                continue;
            }
            for diag in diagnostics {
                lines.push(format_diagnostic(path_str, &diag));
            }
        }

        if lines.is_empty() {
            lines.push("No files checked.".to_string());
        }
        Ok(vec![ToolText::new(lines.join("\n"))])
    }
}

fn format_diagnostic(path: &str, diag: &Value) -> String {
    let start = &diag["range"]["start"];
    let line = start.get("line").and_then(Value::as_u64).unwrap_or(0);
    let character = start.get("character").and_then(Value::as_u64).unwrap_or(0);
    let severity = diag
        .get("severity")
        .and_then(Value::as_u64)
        .and_then(|s| SEVERITIES.get((s as usize).saturating_sub(1)))
        .unwrap_or(&"information");
    let message = diag.get("message").and_then(Value::as_str).unwrap_or("");
    format!("{path}:{line}:{character} [{severity}] {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_lsp_bridge_degrades_to_sentinel() {
        let ctx = ToolContext::standalone("/ws");
        let out = GetErrors
            .execute(json!({"filePaths": ["/ws/a.py"]}), &ctx)
            .await
            .unwrap();
        assert!(out[0].0.contains("No diagnostics available"));
    }

    #[test]
    fn formats_diagnostics() {
        let diag = json!({
            "range": {"start": {"line": 4, "character": 2}},
            "severity": 1,
            "message": "name 'x' is not defined",
        });
        assert_eq!(
            format_diagnostic("a.py", &diag),
            "a.py:4:2 [error] name 'x' is not defined"
        );
    }

    #[test]
    fn unknown_severity_defaults_to_information() {
        let diag = json!({"range": {"start": {}}, "message": "m"});
        assert!(format_diagnostic("a.py", &diag).contains("[information]"));
    }
}
