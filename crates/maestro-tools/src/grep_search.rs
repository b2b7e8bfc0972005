//! Search file contents for a pattern.

use std::path::Path;

use maestro_core::ToolSchema;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::registry::TOOL_OUTPUT_LIMIT;
use crate::{required_str, ClientTool, ToolError, ToolResult, ToolText};

pub(crate) struct GrepSearch;

#[async_trait::async_trait]
impl ClientTool for GrepSearch {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "grep_search",
            "Search for a text pattern or regex in files within the workspace.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The pattern to search for."},
                    "isRegexp": {"type": "boolean", "description": "Whether the pattern is a regex. Default: false."},
                    "includePattern": {"type": "string", "description": "Glob pattern to filter which files to search."},
                },
                "required": ["query"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let query = required_str(&input, "query")?;
        let is_regexp = input
            .get("isRegexp")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let include = input
            .get("includePattern")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty());

        let pattern = if is_regexp {
            regex::Regex::new(query)
                .map_err(|e| ToolError::InvalidArguments(format!("bad regex: {e}")))?
        } else {
            regex::Regex::new(&regex::escape(query)).expect("escaped pattern is valid")
        };
        let include = include.map(super::file_search::glob_to_regex);

        let mut lines = Vec::new();
        let mut budget = TOOL_OUTPUT_LIMIT;
        search(&ctx.workspace_root, &pattern, include.as_ref(), &mut lines, &mut budget);

        let text = if lines.is_empty() {
            "No matches found.".to_string()
        } else {
            lines.join("\n")
        };
        Ok(vec![ToolText::new(text)])
    }
}

fn search(
    dir: &Path,
    pattern: &regex::Regex,
    include: Option<&regex::Regex>,
    lines: &mut Vec<String>,
    budget: &mut usize,
) {
    if *budget == 0 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if path.is_dir() {
            if name.starts_with('.') || super::file_search::SKIP_DIRS.contains(&name.as_str()) {
                continue;
            }
            search(&path, pattern, include, lines, budget);
        } else {
            if include.is_some_and(|inc| !inc.is_match(&name)) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue; // binary or unreadable
            };
            for (lineno, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    let hit = format!("{}:{}:{}", path.display(), lineno.saturating_add(1), line);
                    *budget = budget.saturating_sub(hit.len().min(*budget));
                    lines.push(hit);
                    if *budget == 0 {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_literal_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\nneedle here\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "no match\n").unwrap();

        let ctx = ToolContext::standalone(dir.path());
        let out = GrepSearch
            .execute(json!({"query": "needle"}), &ctx)
            .await
            .unwrap();
        assert!(out[0].0.contains("a.py:2:needle here"));
        assert!(!out[0].0.contains("b.txt"));
    }

    #[tokio::test]
    async fn regex_and_include_filters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "def alpha():\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn alpha() {}\n").unwrap();

        let ctx = ToolContext::standalone(dir.path());
        let out = GrepSearch
            .execute(
                json!({"query": r"fn \w+", "isRegexp": true, "includePattern": "*.rs"}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(out[0].0.contains("b.rs:1:"));
        assert!(!out[0].0.contains("a.py"));
    }

    #[tokio::test]
    async fn literal_query_is_not_a_regex() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "price is $5.00 (sale)\n").unwrap();
        let ctx = ToolContext::standalone(dir.path());
        let out = GrepSearch
            .execute(json!({"query": "$5.00 (sale)"}), &ctx)
            .await
            .unwrap();
        assert!(out[0].0.contains("a.txt:1:"));
    }

    #[tokio::test]
    async fn no_matches_is_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::standalone(dir.path());
        let out = GrepSearch
            .execute(json!({"query": "absent"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out[0].0, "No matches found.");
    }
}
