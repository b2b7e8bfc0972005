//! Best-effort JSON extraction from free-text model replies.

use serde_json::Value;

/// Extract a JSON value from a prose reply.
///
/// Tries, in order: the whole trimmed text when it leads with `{` or `[`;
/// the content of the first ` ```json ` fence; the content of the first
/// generic ` ``` ` fence; the first balanced `{…}` substring found by depth
/// counting. Returns the first successful parse, or `None`.
#[must_use]
pub fn extract_json(reply: &str) -> Option<Value> {
    let text = reply.trim();

    if text.starts_with('{') || text.starts_with('[') {
        if let Ok(value) = serde_json::from_str(text) {
            return Some(value);
        }
    }

    if let Some(block) = fenced_block(text, "```json") {
        if let Ok(value) = serde_json::from_str(block.trim()) {
            return Some(value);
        }
    }

    if let Some(block) = fenced_block(text, "```") {
        if let Ok(value) = serde_json::from_str(block.trim()) {
            return Some(value);
        }
    }

    balanced_object(text).and_then(|candidate| serde_json::from_str(candidate).ok())
}

/// Content between the first `fence` marker and the following ` ``` `.
fn fenced_block<'a>(text: &'a str, fence: &str) -> Option<&'a str> {
    let (_, after) = text.split_once(fence)?;
    Some(after.split_once("```").map_or(after, |(block, _)| block))
}

/// First balanced `{…}` substring, located by brace-depth counting.
fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth = depth.saturating_add(1),
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start.checked_add(offset)?.checked_add(1)?;
                    return Some(&text[start..end]);
                }
            },
            _ => {},
        }
    }
    None
}
