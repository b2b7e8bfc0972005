//! List directory entries.

use maestro_core::ToolSchema;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::{required_str, ClientTool, ToolResult, ToolText};

pub(crate) struct ListDir;

#[async_trait::async_trait]
impl ClientTool for ListDir {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "list_dir",
            "List the contents of a directory.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "The absolute path to the directory to list."},
                },
                "required": ["path"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = ctx.resolve(required_str(&input, "path")?);
        let mut names = Vec::new();
        let mut reader = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = reader.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            match tokio::fs::metadata(path.join(&name)).await {
                Ok(meta) if meta.is_dir() => entries.push(format!("[dir]  {name}")),
                Ok(meta) => entries.push(format!("[file] {name} ({} bytes)", meta.len())),
                Err(_) => entries.push(format!("[file] {name}")),
            }
        }

        let listing = if entries.is_empty() {
            "(empty)".to_string()
        } else {
            entries.join("\n")
        };
        Ok(vec![ToolText::new(listing)])
    }
}
