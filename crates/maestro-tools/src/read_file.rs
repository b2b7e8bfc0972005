//! Read the contents of a file, optionally a line range.

use maestro_core::ToolSchema;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::{required_str, ClientTool, ToolResult, ToolText};

pub(crate) struct ReadFile;

#[async_trait::async_trait]
impl ClientTool for ReadFile {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "read_file",
            "Read the contents of a file, optionally specifying a line range.",
            json!({
                "type": "object",
                "properties": {
                    "filePath": {"type": "string", "description": "The absolute path of the file to read."},
                    "startLineNumberBaseOne": {"type": "number", "description": "Start line (1-based). Default: 1."},
                    "endLineNumberBaseOne": {"type": "number", "description": "End line inclusive (1-based). Default: end of file."},
                },
                "required": ["filePath"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = ctx.resolve(required_str(&input, "filePath")?);
        let content = tokio::fs::read_to_string(&path).await?;
        let lines: Vec<&str> = content.lines().collect();
        let total = lines.len();

        let start = input
            .get("startLineNumberBaseOne")
            .and_then(Value::as_u64)
            .map_or(1, |n| n.max(1)) as usize;
        let end = input
            .get("endLineNumberBaseOne")
            .and_then(Value::as_u64)
            .map_or(total, |n| n as usize)
            .min(total);

        let selected = if start > total {
            String::new()
        } else {
            lines[start.saturating_sub(1)..end].join("\n")
        };

        Ok(vec![ToolText::new(format!(
            "File `{}`. Total {total} lines. Line range (1-based) {start} to {end}:\n```\n{selected}\n```",
            path.display()
        ))])
    }
}
