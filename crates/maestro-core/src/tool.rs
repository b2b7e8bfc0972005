//! Tool schema wire type.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Schema for a single client tool as registered with the upstream server.
///
/// `input_schema` is a JSON Schema object with a top-level `"object"` type,
/// a `properties` map, and an always-present `required` list (possibly
/// empty); the upstream server rejects registrations without one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description shown to the model.
    pub description: String,
    /// JSON Schema for the tool input.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolSchema {
    /// Create a schema with an empty object input.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": [],
            }),
        }
    }

    /// Create a schema with the given input schema.
    #[must_use]
    pub fn with_input(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_schema_has_required_list() {
        let schema = ToolSchema::new("get_status", "Report agent status.");
        assert_eq!(schema.input_schema["required"], json!([]));
        assert_eq!(schema.input_schema["type"], "object");
    }

    #[test]
    fn serializes_with_camel_case_input_schema() {
        let schema = ToolSchema::new("t", "d");
        let v = serde_json::to_value(&schema).unwrap();
        assert!(v.get("inputSchema").is_some());
        assert!(v.get("input_schema").is_none());
    }
}
