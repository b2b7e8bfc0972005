//! Create (or overwrite) a file and sync it to the upstream session.

use maestro_core::ToolSchema;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::{required_str, ClientTool, ToolResult, ToolText};

pub(crate) struct CreateFile;

#[async_trait::async_trait]
impl ClientTool for CreateFile {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "create_file",
            "Create a new file with the given content. Overwrites if the file exists.",
            json!({
                "type": "object",
                "properties": {
                    "filePath": {"type": "string", "description": "The absolute path of the file to create."},
                    "content": {"type": "string", "description": "The full content of the file."},
                },
                "required": ["filePath", "content"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = ctx.resolve(required_str(&input, "filePath")?);
        let content = input.get("content").and_then(Value::as_str).unwrap_or("");

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        ctx.docs.sync_file(&path, content).await;

        Ok(vec![ToolText::new(format!(
            "Created {} ({} bytes)",
            path.display(),
            content.len()
        ))])
    }
}
