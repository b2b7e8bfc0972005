//! JSON Schema sanitisation for upstream tool registration.
//!
//! The upstream assistant's tool registration is stricter than JSON Schema:
//! every property needs a plain string `"type"`, unions are rejected, and
//! object schemas must carry a `"required"` list. MCP servers emit schemas
//! with all of these constructs, so they are normalised before exposure.

use serde_json::{json, Map, Value};

/// Normalise a tool input schema in place.
///
/// - `anyOf` / `oneOf` unions collapse to the first non-null variant's type
///   (its remaining keys are merged in).
/// - Array-typed `"type"` (e.g. `["object", "null"]`) becomes the first
///   non-null entry.
/// - A schema with neither `type` nor `properties` gets `"type": "string"`.
/// - Object schemas get a `"required"` list when absent.
/// - `properties`, `items` and `additionalProperties` are sanitised
///   recursively.
///
/// Sanitising an already-sanitised schema is the identity.
pub fn sanitize_schema(schema: &mut Value) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };

    for keyword in ["anyOf", "oneOf"] {
        if let Some(Value::Array(variants)) = obj.remove(keyword) {
            collapse_union(obj, &variants);
        }
    }

    if let Some(Value::Array(types)) = obj.get("type") {
        let first = types
            .iter()
            .filter_map(Value::as_str)
            .find(|t| *t != "null")
            .unwrap_or("string")
            .to_string();
        obj.insert("type".into(), json!(first));
    }

    if !obj.contains_key("type") && !obj.contains_key("properties") {
        obj.insert("type".into(), json!("string"));
    }

    let is_object_schema = obj.get("type").and_then(Value::as_str) == Some("object")
        || obj.contains_key("properties");
    if is_object_schema && !obj.contains_key("required") {
        obj.insert("required".into(), json!([]));
    }

    if let Some(Value::Object(properties)) = obj.get_mut("properties") {
        for prop in properties.values_mut() {
            sanitize_schema(prop);
        }
    }
    for keyword in ["items", "additionalProperties"] {
        if let Some(nested) = obj.get_mut(keyword) {
            if nested.is_object() {
                sanitize_schema(nested);
            }
        }
    }
}

/// Replace a union with its first non-null variant.
fn collapse_union(obj: &mut Map<String, Value>, variants: &[Value]) {
    let first_type = variants
        .iter()
        .filter_map(|v| v.get("type").and_then(Value::as_str))
        .find(|t| *t != "null")
        .unwrap_or("string")
        .to_string();

    if let Some(variant) = variants
        .iter()
        .filter_map(Value::as_object)
        .find(|v| v.get("type").and_then(Value::as_str) != Some("null"))
    {
        for (key, value) in variant {
            if key != "type" && !obj.contains_key(key) {
                obj.insert(key.clone(), value.clone());
            }
        }
    }

    obj.insert("type".into(), json!(first_type));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_any_of_union() {
        let mut schema = json!({
            "anyOf": [
                {"type": "object", "properties": {"p": {"type": "string"}}},
                {"type": "null"},
            ]
        });
        sanitize_schema(&mut schema);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["p"]["type"], "string");
        assert_eq!(schema["required"], json!([]));
        assert!(schema.get("anyOf").is_none());
    }

    #[test]
    fn collapses_one_of_union() {
        let mut schema = json!({"oneOf": [{"type": "null"}, {"type": "number"}]});
        sanitize_schema(&mut schema);
        assert_eq!(schema["type"], "number");
    }

    #[test]
    fn flattens_array_type() {
        let mut schema = json!({"type": ["object", "null"], "properties": {}});
        sanitize_schema(&mut schema);
        assert_eq!(schema["type"], "object");
    }

    #[test]
    fn all_null_array_type_defaults_to_string() {
        let mut schema = json!({"type": ["null"]});
        sanitize_schema(&mut schema);
        assert_eq!(schema["type"], "string");
    }

    #[test]
    fn typeless_property_defaults_to_string() {
        let mut schema = json!({
            "type": "object",
            "properties": {"q": {"description": "a query"}},
            "required": ["q"],
        });
        sanitize_schema(&mut schema);
        assert_eq!(schema["properties"]["q"]["type"], "string");
    }

    #[test]
    fn recurses_into_items_and_additional_properties() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "list": {"type": "array", "items": {"type": ["string", "null"]}},
            },
            "additionalProperties": {"anyOf": [{"type": "boolean"}]},
        });
        sanitize_schema(&mut schema);
        assert_eq!(schema["properties"]["list"]["items"]["type"], "string");
        assert_eq!(schema["additionalProperties"]["type"], "boolean");
    }

    #[test]
    fn sanitising_twice_is_identity() {
        let mut schema = json!({
            "anyOf": [
                {"type": ["object", "null"], "properties": {"x": {"anyOf": [{"type": "integer"}]}}},
                {"type": "null"},
            ]
        });
        sanitize_schema(&mut schema);
        let once = schema.clone();
        sanitize_schema(&mut schema);
        assert_eq!(schema, once);
    }

    #[test]
    fn already_clean_schema_is_untouched() {
        let mut schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string", "description": "file path"}},
            "required": ["path"],
        });
        let before = schema.clone();
        sanitize_schema(&mut schema);
        assert_eq!(schema, before);
    }
}
