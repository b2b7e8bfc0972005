//! Soft validation: extract, coerce, warn; never reject.

use serde_json::{json, Map, Value};

use crate::compact::CompactSchema;

/// Outcome of soft-validating a candidate answer against a schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    /// Fields that matched the schema, after coercion.
    pub parsed: Map<String, Value>,
    /// Fields present in the candidate but absent from the schema.
    pub extras: Map<String, Value>,
    /// Required field names that were absent.
    pub missing: Vec<String>,
    /// Human-readable findings.
    pub warnings: Vec<String>,
    /// The input, unchanged (the parsed object when a string input parsed
    /// as one, otherwise the original value).
    pub raw: Value,
}

/// Soft-validate `data` against `schema`.
///
/// String input is first parsed as JSON; a string that is not a JSON object
/// yields an empty `parsed` map, the full required list in `missing`, and a
/// warning, with the raw string preserved. Field values are coerced to the
/// schema type with permissive rules; a failed coercion keeps the original
/// value and records a warning. This function never fails.
#[must_use]
pub fn soft_validate(data: &Value, schema: &CompactSchema) -> Validation {
    let object = match data {
        Value::Object(map) => map.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                return non_object_result(
                    data,
                    schema,
                    "Response is not a JSON object; treating as raw reply",
                );
            },
            Err(_) => {
                return non_object_result(
                    data,
                    schema,
                    "Response is not valid JSON; treating as raw reply",
                );
            },
        },
        _ => {
            return non_object_result(
                data,
                schema,
                "Response is not a JSON object; treating as raw reply",
            );
        },
    };

    let mut parsed = Map::new();
    let mut extras = Map::new();
    let mut missing = Vec::new();
    let mut warnings = Vec::new();

    for (name, spec) in &schema.0 {
        match object.get(name) {
            Some(value) => {
                let coerced = match spec.field_type.as_deref() {
                    Some(expected) => coerce(value, expected, name, &mut warnings),
                    None => value.clone(),
                };
                parsed.insert(name.clone(), coerced);
            },
            None if spec.required => {
                missing.push(name.clone());
                warnings.push(format!("Required field '{name}' is missing"));
            },
            None => {},
        }
    }

    for (key, value) in &object {
        if !schema.0.contains_key(key) {
            extras.insert(key.clone(), value.clone());
        }
    }

    Validation {
        parsed,
        extras,
        missing,
        warnings,
        raw: Value::Object(object),
    }
}

/// Merge a validation's parsed fields and extras into one answer object,
/// with a `_validation` key carrying the findings.
#[must_use]
pub fn answer_from_validation(validation: &Validation) -> Value {
    let mut answer = validation.parsed.clone();
    for (key, value) in &validation.extras {
        answer.insert(key.clone(), value.clone());
    }
    answer.insert(
        "_validation".into(),
        json!({
            "missing": validation.missing,
            "warnings": validation.warnings,
        }),
    );
    Value::Object(answer)
}

fn non_object_result(data: &Value, schema: &CompactSchema, warning: &str) -> Validation {
    Validation {
        parsed: Map::new(),
        extras: Map::new(),
        missing: schema.required_fields(),
        warnings: vec![warning.to_string()],
        raw: data.clone(),
    }
}

fn coerce(value: &Value, expected: &str, name: &str, warnings: &mut Vec<String>) -> Value {
    let coerced = match expected {
        "string" => coerce_string(value),
        "number" => coerce_number(value),
        "integer" => coerce_integer(value),
        "boolean" => coerce_boolean(value),
        // array, object, or unknown type: taken as-is.
        _ => Some(value.clone()),
    };

    match coerced {
        Some(coerced) => {
            if coerced != *value {
                warnings.push(format!(
                    "Field '{name}': coerced {} to {expected}",
                    json_type_name(value)
                ));
            }
            coerced
        },
        None => {
            warnings.push(format!(
                "Field '{name}': cannot coerce {} to {expected}",
                json_type_name(value)
            ));
            value.clone()
        },
    }
}

fn coerce_string(value: &Value) -> Option<Value> {
    match value {
        Value::Null => Some(Value::Null),
        Value::String(_) => Some(value.clone()),
        Value::Bool(b) => Some(json!(b.to_string())),
        Value::Number(n) => Some(json!(n.to_string())),
        other => Some(json!(other.to_string())),
    }
}

fn coerce_number(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(s) => s.trim().parse::<f64>().ok().and_then(|f| {
            // Keep integral strings integral.
            integral_to_i64(f).map_or_else(
                || serde_json::Number::from_f64(f).map(Value::Number),
                |i| Some(json!(i)),
            )
        }),
        _ => None,
    }
}

fn coerce_integer(value: &Value) -> Option<Value> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(json!(i))
            } else {
                n.as_f64().and_then(integral_to_i64).map(|i| json!(i))
            }
        },
        Value::String(s) => s.trim().parse::<i64>().ok().map(|i| json!(i)),
        _ => None,
    }
}

/// An f64 as i64, only when it is integral and exactly representable.
#[allow(clippy::cast_possible_truncation)]
fn integral_to_i64(f: f64) -> Option<i64> {
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        Some(f as i64)
    } else {
        None
    }
}

fn coerce_boolean(value: &Value) -> Option<Value> {
    match value {
        Value::Bool(_) => Some(value.clone()),
        Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(json!(true)),
            "false" | "0" | "no" => Some(json!(false)),
            _ => None,
        },
        Value::Number(n) => Some(json!(n.as_f64().is_some_and(|f| f != 0.0))),
        _ => None,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review_schema() -> CompactSchema {
        CompactSchema::from_value(&json!({
            "approved": {"type": "boolean", "required": true},
            "summary": {"type": "string", "required": true},
            "issues": {"type": "array"},
        }))
    }

    #[test]
    fn happy_path_passes_clean() {
        let data = json!({"approved": true, "issues": [], "summary": "Looks good"});
        let v = soft_validate(&data, &review_schema());
        assert!(v.missing.is_empty());
        assert!(v.warnings.is_empty());
        assert_eq!(v.parsed["approved"], json!(true));
        assert_eq!(v.parsed["summary"], json!("Looks good"));
        assert_eq!(v.parsed["issues"], json!([]));
        assert!(v.extras.is_empty());
    }

    #[test]
    fn coerces_and_collects_extras() {
        let data = json!({"approved": "true", "summary": 42, "confidence": 0.9});
        let v = soft_validate(&data, &review_schema());
        assert_eq!(v.parsed["approved"], json!(true));
        assert_eq!(v.parsed["summary"], json!("42"));
        assert_eq!(v.extras["confidence"], json!(0.9));
        assert!(v.missing.is_empty());
        assert_eq!(v.warnings.len(), 2, "warnings: {:?}", v.warnings);
        assert!(v.warnings.iter().all(|w| w.contains("coerced")));
    }

    #[test]
    fn missing_required_fields_warn() {
        let data = json!({"issues": ["a"]});
        let v = soft_validate(&data, &review_schema());
        assert_eq!(v.missing, vec!["approved", "summary"]);
        assert_eq!(v.warnings.len(), 2);
        assert!(v.parsed.contains_key("issues"));
    }

    #[test]
    fn string_input_is_parsed() {
        let data = json!(r#"{"approved": false, "summary": "no"}"#);
        let v = soft_validate(&data, &review_schema());
        assert_eq!(v.parsed["approved"], json!(false));
        assert!(v.missing.is_empty());
        // raw becomes the parsed object
        assert!(v.raw.is_object());
    }

    #[test]
    fn non_json_string_degrades_with_raw_preserved() {
        let data = json!("I could not produce JSON, sorry.");
        let v = soft_validate(&data, &review_schema());
        assert!(v.parsed.is_empty());
        assert_eq!(v.missing, vec!["approved", "summary"]);
        assert_eq!(v.warnings.len(), 1);
        assert!(v.warnings[0].contains("not valid JSON"));
        assert_eq!(v.raw, data);
    }

    #[test]
    fn json_non_object_string_degrades() {
        let data = json!("[1, 2, 3]");
        let v = soft_validate(&data, &review_schema());
        assert!(v.parsed.is_empty());
        assert!(v.warnings[0].contains("not a JSON object"));
        assert_eq!(v.raw, data);
    }

    #[test]
    fn failed_coercion_keeps_original_with_warning() {
        let schema = CompactSchema::from_value(&json!({"count": {"type": "integer"}}));
        let v = soft_validate(&json!({"count": "plenty"}), &schema);
        assert_eq!(v.parsed["count"], json!("plenty"));
        assert_eq!(v.warnings.len(), 1);
        assert!(v.warnings[0].contains("cannot coerce"));
    }

    #[test]
    fn numeric_coercions() {
        let schema = CompactSchema::from_value(&json!({
            "n": {"type": "number"},
            "i": {"type": "integer"},
        }));
        let v = soft_validate(&json!({"n": "3.5", "i": "7"}), &schema);
        assert_eq!(v.parsed["n"], json!(3.5));
        assert_eq!(v.parsed["i"], json!(7));

        let v = soft_validate(&json!({"n": 2, "i": 4.0}), &schema);
        assert_eq!(v.parsed["n"], json!(2));
        assert_eq!(v.parsed["i"], json!(4));
    }

    #[test]
    fn boolean_coercion_rules() {
        let schema = CompactSchema::from_value(&json!({"ok": {"type": "boolean"}}));
        for (input, expected) in [
            (json!("yes"), json!(true)),
            (json!("NO"), json!(false)),
            (json!("1"), json!(true)),
            (json!(0), json!(false)),
            (json!(2), json!(true)),
        ] {
            let v = soft_validate(&json!({"ok": input}), &schema);
            assert_eq!(v.parsed["ok"], expected, "input: {input:?}");
        }
    }

    #[test]
    fn round_trip_superset_has_no_missing() {
        // Any input whose keys form a superset of the required fields
        // validates with missing == [].
        let schema = review_schema();
        let answer = json!({"approved": true, "summary": "s", "extra": 1});
        let v = soft_validate(&answer, &schema);
        assert!(v.missing.is_empty());
        let merged = answer_from_validation(&v);
        assert_eq!(merged["approved"], json!(true));
        assert_eq!(merged["extra"], json!(1));
        assert_eq!(merged["_validation"]["missing"], json!([]));
    }
}
