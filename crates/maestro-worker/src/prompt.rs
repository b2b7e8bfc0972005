//! Task prompt assembly.

use maestro_schema::CompactSchema;
use serde_json::Value;

/// Build the actual prompt sent to the upstream model.
///
/// Joins, in order and separated by blank lines:
///
/// 1. `<system_instructions>`, only when `system_prompt` is given (first
///    turn of a conversation);
/// 2. `<shared_context>`, the JSON context when non-empty;
/// 3. `<structured_input>`, schema-matched fields the caller supplied;
/// 4. the free-form task prompt;
/// 5. `<response_format>` guidance rendered from the answer schema.
#[must_use]
pub fn build_task_prompt(
    system_prompt: Option<&str>,
    context: &Value,
    structured: Option<&Value>,
    prompt: &str,
    answer_schema: Option<&CompactSchema>,
) -> String {
    let mut parts: Vec<String> = Vec::new();

    if let Some(system) = system_prompt {
        if !system.is_empty() {
            parts.push(format!(
                "<system_instructions>{system}</system_instructions>"
            ));
        }
    }

    if let Some(rendered) = render_block_value(context) {
        parts.push(format!("<shared_context>{rendered}</shared_context>"));
    }

    if let Some(rendered) = structured.and_then(render_block_value) {
        parts.push(format!("<structured_input>{rendered}</structured_input>"));
    }

    parts.push(prompt.to_string());

    if let Some(schema) = answer_schema {
        if !schema.is_empty() {
            let fields = schema.to_description("Expected response format");
            parts.push(format!(
                "\n<response_format>\nPlease structure your response as JSON with these fields:\n{fields}\nYou may include additional fields beyond these. Wrap the JSON in ```json fences.\n</response_format>"
            ));
        }
    }

    parts.join("\n\n")
}

/// Render a context-like value for embedding: pretty JSON for a non-empty
/// object, the raw text for a non-empty string, nothing otherwise.
fn render_block_value(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) if !map.is_empty() => {
            Some(serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()))
        },
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_turn_carries_system_instructions() {
        let prompt = build_task_prompt(
            Some("You are a reviewer."),
            &json!({}),
            None,
            "Review auth.py",
            None,
        );
        assert!(prompt
            .starts_with("<system_instructions>You are a reviewer.</system_instructions>\n\n"));
        assert!(prompt.ends_with("Review auth.py"));
        assert!(!prompt.contains("<shared_context>"));
    }

    #[test]
    fn followup_turn_is_bare() {
        let prompt = build_task_prompt(None, &json!({}), None, "Continue", None);
        assert_eq!(prompt, "Continue");
    }

    #[test]
    fn context_is_embedded_as_json() {
        let context = json!({"result_from_coder_task_0": "wrote auth.py"});
        let prompt = build_task_prompt(None, &context, None, "Review it", None);
        assert!(prompt.contains("<shared_context>"));
        assert!(prompt.contains("result_from_coder_task_0"));
        assert!(prompt.contains("wrote auth.py"));
    }

    #[test]
    fn string_context_is_embedded_raw() {
        let context = json!("{\"already\": \"encoded\"}");
        let prompt = build_task_prompt(None, &context, None, "Go", None);
        assert!(prompt.contains("<shared_context>{\"already\": \"encoded\"}</shared_context>"));
    }

    #[test]
    fn structured_input_between_context_and_prompt() {
        let context = json!({"k": "v"});
        let structured = json!({"file_path": "src/auth.py"});
        let prompt = build_task_prompt(None, &context, Some(&structured), "Inspect", None);

        let ctx_pos = prompt.find("<shared_context>").unwrap();
        let structured_pos = prompt.find("<structured_input>").unwrap();
        let task_pos = prompt.find("Inspect").unwrap();
        assert!(ctx_pos < structured_pos && structured_pos < task_pos);
    }

    #[test]
    fn answer_schema_appends_response_format() {
        let schema = CompactSchema::from_value(&json!({
            "approved": {"type": "boolean", "required": true},
        }));
        let prompt = build_task_prompt(None, &json!({}), None, "Review", Some(&schema));
        assert!(prompt.contains("<response_format>"));
        assert!(prompt.contains("approved (boolean, required)"));
        assert!(prompt.contains("```json fences"));
    }

    #[test]
    fn empty_schema_adds_nothing() {
        let schema = CompactSchema::default();
        let prompt = build_task_prompt(None, &json!({}), None, "Go", Some(&schema));
        assert_eq!(prompt, "Go");
    }
}
