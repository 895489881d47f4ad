//! JSON-schema subset validator for tool arguments.
//!
//! Supports the keywords tool schemas actually use: `type` (single or
//! list), `properties`, `required`, `additionalProperties: false`, `items`,
//! `enum`, `minimum`/`maximum`, `minLength`, `minItems`. Every violation is
//! reported with its field path; validation never stops at the first one.

use serde_json::Value;

use codehelm_core::error::FieldIssue;

/// JSON type name of a value, as a schema would spell it.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(value: &Value, expected: &str) -> bool {
    match expected {
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        "number" => value.is_number(),
        "any" => true,
        other => json_type_name(value) == other,
    }
}

fn child_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

/// Validate `value` against `schema`, appending every violation to `issues`.
pub fn validate_value(value: &Value, schema: &Value, path: &str, issues: &mut Vec<FieldIssue>) {
    // Type
    let expected: Vec<&str> = match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(|t| t.as_str()).collect(),
        _ => Vec::new(),
    };
    if !expected.is_empty() && !expected.iter().any(|t| type_matches(value, t)) {
        issues.push(FieldIssue::new(
            path,
            format!("expected {}, got {}", expected.join(" or "), json_type_name(value)),
        ));
        return;
    }

    // Enum
    if let Some(allowed) = schema.get("enum").and_then(|v| v.as_array()) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(|v| v.to_string()).collect();
            issues.push(FieldIssue::new(
                path,
                format!("must be one of [{}]", options.join(", ")),
            ));
        }
    }

    match value {
        Value::Object(map) => {
            if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
                for field in required.iter().filter_map(|f| f.as_str()) {
                    if !map.contains_key(field) {
                        issues.push(FieldIssue::new(
                            child_path(path, field),
                            "missing required field",
                        ));
                    }
                }
            }

            let properties = schema.get("properties").and_then(|v| v.as_object());
            let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

            for (key, child) in map {
                match properties.and_then(|p| p.get(key)) {
                    Some(child_schema) => {
                        validate_value(child, child_schema, &child_path(path, key), issues)
                    }
                    None if closed => issues.push(FieldIssue::new(
                        child_path(path, key),
                        "unknown field",
                    )),
                    None => {}
                }
            }
        }
        Value::Array(items) => {
            if let Some(min) = schema.get("minItems").and_then(|v| v.as_u64()) {
                if (items.len() as u64) < min {
                    issues.push(FieldIssue::new(
                        path,
                        format!("expected at least {min} items, got {}", items.len()),
                    ));
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for (idx, item) in items.iter().enumerate() {
                    validate_value(item, item_schema, &format!("{path}[{idx}]"), issues);
                }
            }
        }
        Value::Number(n) => {
            if let Some(x) = n.as_f64() {
                if let Some(min) = schema.get("minimum").and_then(|v| v.as_f64()) {
                    if x < min {
                        issues.push(FieldIssue::new(path, format!("must be >= {min}")));
                    }
                }
                if let Some(max) = schema.get("maximum").and_then(|v| v.as_f64()) {
                    if x > max {
                        issues.push(FieldIssue::new(path, format!("must be <= {max}")));
                    }
                }
            }
        }
        Value::String(s) => {
            if let Some(min) = schema.get("minLength").and_then(|v| v.as_u64()) {
                if (s.chars().count() as u64) < min {
                    issues.push(FieldIssue::new(
                        path,
                        format!("must be at least {min} characters"),
                    ));
                }
            }
        }
        _ => {}
    }
}

/// Parse the raw argument string an LLM supplied into a JSON value.
///
/// An empty string means "no arguments".
pub fn parse_arguments(raw: &str) -> Result<Value, FieldIssue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(trimmed)
        .map_err(|e| FieldIssue::new("", format!("arguments are not valid JSON: {e}")))
}
