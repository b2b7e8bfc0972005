//! Find files by glob pattern or substring.

use std::path::Path;

use maestro_core::ToolSchema;
use serde_json::{json, Value};

use crate::context::ToolContext;
use crate::{required_str, ClientTool, ToolResult, ToolText};

/// Directories never worth searching.
pub(crate) const SKIP_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    "venv",
    ".venv",
    "vendor",
    "target",
];

/// Results returned when the caller does not ask for a limit.
const DEFAULT_MAX_RESULTS: usize = 50;

pub(crate) struct FileSearch;

#[async_trait::async_trait]
impl ClientTool for FileSearch {
    fn schema(&self) -> ToolSchema {
        ToolSchema::with_input(
            "file_search",
            "Search for files by name or glob pattern in the workspace.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "Glob pattern or substring to match file names/paths."},
                    "maxResults": {"type": "number", "description": "Maximum number of results to return."},
                },
                "required": ["query"],
            }),
        )
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let query = required_str(&input, "query")?;
        let max_results = input
            .get("maxResults")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_MAX_RESULTS, |n| n as usize)
            .max(1);

        let matcher = Matcher {
            glob: glob_to_regex(query),
            query_lower: query.to_lowercase(),
        };
        let mut matches = Vec::new();
        walk(
            &ctx.workspace_root,
            &ctx.workspace_root,
            &matcher,
            max_results,
            &mut matches,
        );

        let text = if matches.is_empty() {
            "No files found.".to_string()
        } else {
            matches.join("\n")
        };
        Ok(vec![ToolText::new(text)])
    }
}

/// A file matches when its workspace-relative path matches the glob, its
/// bare name matches the glob, or its relative path contains the query
/// (case-insensitive).
struct Matcher {
    glob: regex::Regex,
    query_lower: String,
}

impl Matcher {
    fn matches(&self, relative: &str, name: &str) -> bool {
        self.glob.is_match(relative)
            || self.glob.is_match(name)
            || relative.to_lowercase().contains(&self.query_lower)
    }
}

fn walk(root: &Path, dir: &Path, matcher: &Matcher, max_results: usize, matches: &mut Vec<String>) {
    if matches.len() >= max_results {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        if path.is_dir() {
            if name.starts_with('.') || SKIP_DIRS.contains(&name.as_str()) {
                continue;
            }
            walk(root, &path, matcher, max_results, matches);
        } else {
            let relative = path
                .strip_prefix(root)
                .map_or_else(|_| path.to_string_lossy().into_owned(), |p| {
                    p.to_string_lossy().into_owned()
                });
            if matcher.matches(&relative, &name) {
                matches.push(relative);
                if matches.len() >= max_results {
                    return;
                }
            }
        }
    }
}

/// Translate a shell glob (`*`, `?`) into an anchored regex.
pub(crate) fn glob_to_regex(glob: &str) -> regex::Regex {
    let mut out = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    // The translation only emits valid syntax; an empty glob matches "".
    regex::Regex::new(&out).unwrap_or_else(|_| regex::Regex::new("^$").expect("static regex"))
}
