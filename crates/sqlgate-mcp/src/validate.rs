//! Tool argument validation against the stored `inputSchema`.
//!
//! Covers the subset of JSON Schema that generated tool schemas use:
//! `required`, `type` (single or union), `enum`, `minimum`/`maximum` and
//! `pattern`. Unknown keywords are ignored.

use serde_json::Value;

/// Validate `arguments` against `schema`. The error is a human-readable
/// description suitable for an invalid-params reply.
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), String> {
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => return check_required(schema, |_| false),
        other => return Err(format!("arguments must be an object, got {}", type_name(other))),
    };

    check_required(schema, |field| args.get(field).is_some_and(|v| !v.is_null()))?;

    let Some(props) = schema["properties"].as_object() else {
        return Ok(());
    };

    for (field, prop_schema) in props {
        let Some(value) = args.get(field) else {
            continue;
        };
        // Optional filters are routinely sent as explicit nulls.
        if value.is_null() {
            continue;
        }

        if let Some(allowed) = prop_schema["enum"].as_array() {
            if !allowed.contains(value) {
                return Err(format!(
                    "Invalid value for '{}': {}. Allowed: {}",
                    field,
                    value,
                    Value::Array(allowed.clone())
                ));
            }
        }

        let expected = expected_types(&prop_schema["type"]);
        if !expected.is_empty() && !expected.iter().any(|t| check_type(value, t)) {
            return Err(format!(
                "Invalid type for '{}': expected {}, got {}",
                field,
                expected.join(" | "),
                type_name(value)
            ));
        }

        if let (Some(min), Some(v)) = (prop_schema["minimum"].as_f64(), value.as_f64()) {
            if v < min {
                return Err(format!("Value for '{field}' must be at least {min}"));
            }
        }
        if let (Some(max), Some(v)) = (prop_schema["maximum"].as_f64(), value.as_f64()) {
            if v > max {
                return Err(format!("Value for '{field}' must be at most {max}"));
            }
        }

        if let (Some(pattern), Some(s)) = (prop_schema["pattern"].as_str(), value.as_str()) {
            match regex::Regex::new(pattern) {
                Ok(re) if !re.is_match(s) => {
                    return Err(format!(
                        "Value for '{field}' does not match pattern: {pattern}"
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(field = %field, pattern = %pattern, error = %e, "Ignoring invalid schema pattern");
                }
            }
        }
    }

    Ok(())
}

fn check_required(schema: &Value, present: impl Fn(&str) -> bool) -> Result<(), String> {
    if let Some(required) = schema["required"].as_array() {
        for field in required.iter().filter_map(Value::as_str) {
            if !present(field) {
                return Err(format!("Missing required field: {field}"));
            }
        }
    }
    Ok(())
}

fn expected_types(type_field: &Value) -> Vec<&str> {
    match type_field {
        Value::String(t) => vec![t.as_str()],
        Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

/// Check if a value matches an expected type.
fn check_type(value: &Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
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

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "integer", "minimum": 1},
                "status": {"type": "string", "enum": ["open", "closed"]},
                "email": {"type": ["string", "null"], "pattern": "^[^@]+@[^@]+$"},
                "limit": {"type": "number", "maximum": 1000}
            },
            "required": ["id"]
        })
    }

    #[test]
    fn test_valid_arguments() {
        assert!(validate_arguments(&schema(), &json!({"id": 3, "status": "open", "email": "a@b"})).is_ok());
        assert!(validate_arguments(&schema(), &json!({"id": 3, "email": null, "extra": true})).is_ok());
    }

    #[test]
    fn test_required() {
        let err = validate_arguments(&schema(), &json!({"status": "open"})).unwrap_err();
        assert_eq!(err, "Missing required field: id");
        assert!(validate_arguments(&schema(), &json!({"id": null})).is_err());
        assert!(validate_arguments(&schema(), &Value::Null).is_err());
        assert!(validate_arguments(&json!({}), &Value::Null).is_ok());
    }

    #[test]
    fn test_type_enum_range_pattern() {
        assert!(validate_arguments(&schema(), &json!({"id": "3"})).unwrap_err().contains("Invalid type"));
        assert!(validate_arguments(&schema(), &json!({"id": 2.0})).is_ok());
        assert!(validate_arguments(&schema(), &json!({"id": 1, "status": "pending"})).unwrap_err().contains("Allowed"));
        assert!(validate_arguments(&schema(), &json!({"id": 0})).unwrap_err().contains("at least"));
        assert!(validate_arguments(&schema(), &json!({"id": 1, "limit": 5000})).unwrap_err().contains("at most"));
        assert!(validate_arguments(&schema(), &json!({"id": 1, "email": "nope"})).unwrap_err().contains("pattern"));
    }

    #[test]
    fn test_arguments_must_be_object() {
        assert!(validate_arguments(&schema(), &json!([1, 2])).unwrap_err().contains("object"));
    }
}
