//! Run a shell command in the workspace.

use std::time::Duration;

use maestro_core::ToolSchema;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::{required_str, ClientTool, ToolError, ToolResult, ToolText};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) struct RunInTerminal;

#[async_trait::async_trait]
impl ClientTool for RunInTerminal {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "run_in_terminal",
            "Run a shell command in the workspace and return its output.",
            json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The shell command to run."},
                    "explanation": {"type": "string", "description": "One sentence describing what the command does."},
                },
                "required": ["command"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let command = required_str(&input, "command")?;

        let output = tokio::time::timeout(
            COMMAND_TIMEOUT,
            tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&ctx.workspace_root)
                .output(),
        )
        .await
        .map_err(|_| ToolError::Timeout(COMMAND_TIMEOUT.as_secs()))??;

        let mut text = String::new();
        text.push_str(&String::from_utf8_lossy(&output.stdout));
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str("stderr:\n");
            text.push_str(&stderr);
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            text = format!("Command exited with code {code}\n{text}");
        }
        if text.trim().is_empty() {
            text = "(no output)".to_string();
        }

        Ok(vec![ToolText::new(text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::standalone(dir.path());
        let out = RunInTerminal
            .execute(json!({"command": "echo hello"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out[0].0.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_in_band() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::standalone(dir.path());
        let out = RunInTerminal
            .execute(json!({"command": "exit 3"}), &ctx)
            .await
            .unwrap();
        assert!(out[0].0.contains("exited with code 3"));
    }

    #[tokio::test]
    async fn runs_in_workspace_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let ctx = ToolContext::standalone(dir.path());
        let out = RunInTerminal
            .execute(json!({"command": "ls"}), &ctx)
            .await
            .unwrap();
        assert!(out[0].0.contains("marker.txt"));
    }
}
