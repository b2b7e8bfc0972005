//! Compact field schemas and their JSON Schema / prose renderings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One field of a compact schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// JSON type name (`string`, `number`, `integer`, `boolean`, `array`,
    /// `object`). Absent means "any".
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub field_type: Option<String>,
    /// Human-readable field description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Item schema for array fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Value>,
    /// Default value hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Whether the field must be present.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

/// A compact schema: field name → [`FieldSpec`].
///
/// The compact form is what worker configurations carry
/// (`{"approved": {"type": "boolean", "required": true}, …}`); it converts
/// to standard JSON Schema for tool registration and to prose for prompt
/// guidance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompactSchema(pub BTreeMap<String, FieldSpec>);

impl CompactSchema {
    /// Parse from a polymorphic JSON value, skipping anything that is not a
    /// field-name → object entry. Boundary values are never rejected.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let mut fields = BTreeMap::new();
        if let Value::Object(map) = value {
            for (name, def) in map {
                if def.is_object() {
                    if let Ok(spec) = serde_json::from_value::<FieldSpec>(def.clone()) {
                        fields.insert(name.clone(), spec);
                    }
                }
            }
        }
        Self(fields)
    }

    /// Whether the schema has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Names of all required fields.
    #[must_use]
    pub fn required_fields(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Convert to standard JSON Schema.
    ///
    /// Produces `{"type": "object", "properties": {…}, "required": […]}`;
    /// the `required` list is omitted when empty.
    #[must_use]
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for (name, spec) in &self.0 {
            let mut prop = Map::new();
            if let Some(t) = &spec.field_type {
                prop.insert("type".into(), json!(t));
            }
            if let Some(d) = &spec.description {
                prop.insert("description".into(), json!(d));
            }
            if let Some(items) = &spec.items {
                prop.insert("items".into(), items.clone());
            }
            if let Some(default) = &spec.default {
                prop.insert("default".into(), default.clone());
            }
            properties.insert(name.clone(), Value::Object(prop));
            if spec.required {
                required.push(name.clone());
            }
        }

        let mut schema = json!({"type": "object", "properties": properties});
        if !required.is_empty() {
            schema["required"] = json!(required);
        }
        schema
    }

    /// Render as prompt guidance:
    ///
    /// ```text
    /// Parameters:
    ///   - file_path (string, required): Path to the file to review
    ///   - goal (string): What to focus on
    /// ```
    #[must_use]
    pub fn to_description(&self, label: &str) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let mut lines = vec![format!("{label}:")];
        for (name, spec) in &self.0 {
            let type_str = spec.field_type.as_deref().unwrap_or("any");
            let req = if spec.required { ", required" } else { "" };
            let desc = spec
                .description
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default();
            lines.push(format!("  - {name} ({type_str}{req}){desc}"));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review_schema() -> CompactSchema {
        CompactSchema::from_value(&json!({
            "approved": {"type": "boolean", "required": true},
            "summary": {"type": "string", "required": true, "description": "One-line verdict"},
            "issues": {"type": "array", "items": {"type": "string"}},
        }))
    }

    #[test]
    fn converts_to_json_schema() {
        let schema = review_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["approved"]["type"], "boolean");
        assert_eq!(
            schema["properties"]["summary"]["description"],
            "One-line verdict"
        );
        assert_eq!(schema["properties"]["issues"]["items"]["type"], "string");
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required, &[json!("approved"), json!("summary")]);
    }

    #[test]
    fn empty_required_is_omitted() {
        let schema = CompactSchema::from_value(&json!({
            "note": {"type": "string"},
        }));
        assert!(schema.to_json_schema().get("required").is_none());
    }

    #[test]
    fn json_schema_round_trip_preserves_shape() {
        let compact = review_schema();
        let schema = compact.to_json_schema();

        // Re-extract the compact shape from the JSON Schema.
        let mut rebuilt = Map::new();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        for (name, prop) in schema["properties"].as_object().unwrap() {
            let mut def = prop.clone();
            if required.contains(&name.as_str()) {
                def["required"] = json!(true);
            }
            rebuilt.insert(name.clone(), def);
        }
        assert_eq!(CompactSchema::from_value(&Value::Object(rebuilt)), compact);
    }

    #[test]
    fn renders_description_text() {
        let text = review_schema().to_description("Parameters");
        assert!(text.starts_with("Parameters:\n"));
        assert!(text.contains("  - approved (boolean, required)"));
        assert!(text.contains("  - summary (string, required): One-line verdict"));
        assert!(text.contains("  - issues (array)"));
    }

    #[test]
    fn empty_schema_renders_nothing() {
        assert_eq!(CompactSchema::default().to_description("Parameters"), "");
    }

    #[test]
    fn from_value_skips_non_object_fields() {
        let schema = CompactSchema::from_value(&json!({
            "good": {"type": "string"},
            "junk": "not a field spec",
            "also_junk": 42,
        }));
        assert_eq!(schema.0.len(), 1);
        assert!(schema.0.contains_key("good"));
    }

    #[test]
    fn from_value_on_non_object_is_empty() {
        assert!(CompactSchema::from_value(&json!([1, 2])).is_empty());
        assert!(CompactSchema::from_value(&Value::Null).is_empty());
    }

    #[test]
    fn typeless_field_renders_as_any() {
        let schema = CompactSchema::from_value(&json!({"x": {"description": "anything"}}));
        assert!(schema.to_description("Args").contains("  - x (any): anything"));
    }
}
