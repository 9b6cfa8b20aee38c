//! Argument validation against capability input schemas
//!
//! A deliberately small subset of JSON Schema: object shape, required
//! fields, primitive type checks, and enum membership. Validation runs
//! before dispatch so bad arguments never reach the retry engine.

use serde_json::Value;

/// Check whether a JSON value matches a schema `type` string
fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown type strings are treated as unconstrained
        _ => true,
    }
}

/// Validate `args` against a capability's input schema.
///
/// Returns the first problem found as a message suitable for an
/// `InvalidArguments` failure. A null or non-object schema accepts
/// anything.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(schema_obj) = schema.as_object() else {
        return Ok(());
    };
    if schema_obj.is_empty() {
        return Ok(());
    }

    if schema_obj.get("type").and_then(|t| t.as_str()) == Some("object") && !args.is_object() {
        return Err(format!("expected an object, got {}", json_type_name(args)));
    }

    let args_obj = match args.as_object() {
        Some(o) => o,
        None => return Ok(()),
    };

    if let Some(required) = schema_obj.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|v| v.as_str()) {
            if !args_obj.contains_key(field) {
                return Err(format!("missing required field: {}", field));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(|p| p.as_object()) {
        for (name, prop_schema) in properties {
            let Some(value) = args_obj.get(name) else {
                continue;
            };

            if let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) {
                if !type_matches(expected, value) {
                    return Err(format!(
                        "field '{}' expected {}, got {}",
                        name,
                        expected,
                        json_type_name(value)
                    ));
                }
            }

            if let Some(allowed) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                if !allowed.contains(value) {
                    return Err(format!("field '{}' is not one of the allowed values", name));
                }
            }
        }
    }

    Ok(())
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
    use serde_json::json;

    fn file_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "count": {"type": "integer"},
                "mode": {"type": "string", "enum": ["read", "write"]}
            },
            "required": ["path"]
        })
    }

    #[test]
    fn test_valid_args_pass() {
        let args = json!({"path": "/tmp/a", "count": 3, "mode": "read"});
        assert!(validate_args(&file_schema(), &args).is_ok());
    }

    #[test]
    fn test_missing_required_field() {
        let args = json!({"count": 3});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("path"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let args = json!({"path": 42});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("expected string"));
    }

    #[test]
    fn test_enum_membership() {
        let args = json!({"path": "/tmp/a", "mode": "append"});
        let err = validate_args(&file_schema(), &args).unwrap_err();
        assert!(err.contains("mode"));
    }

    #[test]
    fn test_non_object_args_against_object_schema() {
        let err = validate_args(&file_schema(), &json!("just a string")).unwrap_err();
        assert!(err.contains("expected an object"));
    }

    #[test]
    fn test_empty_schema_accepts_anything() {
        assert!(validate_args(&json!({}), &json!({"whatever": 1})).is_ok());
        assert!(validate_args(&Value::Null, &json!([1, 2])).is_ok());
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        let args = json!({"path": "/tmp/a", "extra": true});
        assert!(validate_args(&file_schema(), &args).is_ok());
    }
}
