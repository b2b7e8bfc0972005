//! Replace an exact string in a file.

use maestro_core::ToolSchema;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::{required_str, ClientTool, ToolError, ToolResult, ToolText};

pub(crate) struct ReplaceStringInFile;

#[async_trait::async_trait]
impl ClientTool for ReplaceStringInFile {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "replace_string_in_file",
            "Replace an exact string match in a file with new content. The old string must appear exactly once.",
            json!({
                "type": "object",
                "properties": {
                    "filePath": {"type": "string", "description": "The absolute path of the file to edit."},
                    "oldString": {"type": "string", "description": "The exact literal text to replace. Include context lines for uniqueness."},
                    "newString": {"type": "string", "description": "The exact literal text to replace oldString with."},
                    "explanation": {"type": "string", "description": "A short explanation of the replacement."},
                },
                "required": ["filePath", "oldString", "newString", "explanation"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let path = ctx.resolve(required_str(&input, "filePath")?);
        let old = required_str(&input, "oldString")?;
        let new = input.get("newString").and_then(Value::as_str).unwrap_or("");

        let content = tokio::fs::read_to_string(&path).await?;
        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            return Err(ToolError::InvalidArguments(format!(
                "oldString not found in {}",
                path.display()
            )));
        }
        if occurrences > 1 {
            return Err(ToolError::InvalidArguments(format!(
                "oldString appears {occurrences} times in {}; provide more context",
                path.display()
            )));
        }

        let updated = content.replacen(old, new, 1);
        tokio::fs::write(&path, &updated).await?;
        ctx.docs.sync_file(&path, &updated).await;

        Ok(vec![ToolText::new(format!(
            "Replaced 1 occurrence in {}",
            path.display()
        ))])
    }
}
