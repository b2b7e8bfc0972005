//! Create a directory (and parents).

use maestro_core::ToolSchema;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::{required_str, ClientTool, ToolResult, ToolText};

pub(crate) struct CreateDirectory;

#[async_trait::async_trait]
impl ClientTool for CreateDirectory {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "create_directory",
            "Create a directory, including any missing parent directories.",
            json!({
                "type": "object",
                "properties": {
                    "dirPath": {"type": "string", "description": "The absolute path of the directory to create."},
                },
                "required": ["dirPath"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = ctx.resolve(required_str(&input, "dirPath")?);
        tokio::fs::create_dir_all(&path).await?;
        Ok(vec![ToolText::new(format!(
            "Created directory {}",
            path.display()
        ))])
    }
}
