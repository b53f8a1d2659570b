//! Adapter configuration schema validation
//!
//! `BasicSchemaValidator` understands the subset of JSON Schema adapter
//! descriptors use: `type`, `required`, `properties`,
//! `additionalProperties: false`, `items`, `minItems`/`maxItems`,
//! `minimum`/`maximum`, `minLength`/`maxLength`, `pattern` and `enum`.
//! Unknown keywords are ignored.

use regex::Regex;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::FieldError;

/// A single schema mismatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSON path of the offending value, e.g. `$.subscriptions[0].qos`
    pub path: String,
    pub message: String,
    pub args: Vec<String>,
    /// Schema keyword that failed
    pub kind: String,
}

impl SchemaViolation {
    fn new(path: &str, message: String, args: Vec<String>, kind: &str) -> Self {
        Self {
            path: path.to_string(),
            message,
            args,
            kind: kind.to_string(),
        }
    }
}

impl From<SchemaViolation> for FieldError {
    fn from(v: SchemaViolation) -> Self {
        FieldError::new(
            v.path,
            format!("{}, args=[{}], type={}", v.message, v.args.join(", "), v.kind),
        )
    }
}

/// Validates adapter configurations against their type's schema
pub trait SchemaValidator: Send + Sync {
    /// All violations found; empty when the config is valid
    fn validate(&self, config: &Value, schema: &Value) -> Vec<SchemaViolation>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BasicSchemaValidator;

impl SchemaValidator for BasicSchemaValidator {
    fn validate(&self, config: &Value, schema: &Value) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        check(config, schema, "$", &mut violations);
        violations
    }
}

fn type_name(value: &Value) -> &'static str {
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

fn matches_type(value: &Value, expected: &str) -> bool {
    match expected {
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        other => type_name(value) == other,
    }
}

fn check(value: &Value, schema: &Value, path: &str, out: &mut Vec<SchemaViolation>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| matches_type(value, t)) {
            let expected = allowed.join(", ");
            out.push(SchemaViolation::new(
                path,
                format!("{}: {} found, {} expected", path, type_name(value), expected),
                vec![type_name(value).to_string(), expected],
                "type",
            ));
            // Nested keywords make no sense on the wrong type
            return;
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let listed = allowed.iter().map(Value::to_string).collect::<Vec<_>>().join(", ");
            out.push(SchemaViolation::new(
                path,
                format!("{}: does not have a value in the enumeration [{}]", path, listed),
                vec![listed],
                "enum",
            ));
        }
    }

    match value {
        Value::Object(object) => check_object(object, schema, path, out),
        Value::Array(items) => check_array(items, schema, path, out),
        Value::Number(n) => {
            if let Some(n) = n.as_f64() {
                check_number(n, schema, path, out);
            }
        }
        Value::String(s) => check_string(s, schema, path, out),
        _ => {}
    }
}

fn check_object(
    object: &Map<String, Value>,
    schema: &Map<String, Value>,
    path: &str,
    out: &mut Vec<SchemaViolation>,
) {
    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                let field = format!("{}.{}", path, name);
                out.push(SchemaViolation::new(
                    &field,
                    format!("{}: is missing but it is required", field),
                    vec![name.to_string()],
                    "required",
                ));
            }
        }
    }

    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
    for (name, child) in object {
        let field = format!("{}.{}", path, name);
        match properties.and_then(|p| p.get(name)) {
            Some(child_schema) => check(child, child_schema, &field, out),
            None if closed => out.push(SchemaViolation::new(
                &field,
                format!(
                    "{}: is not defined in the schema and the schema does not allow additional properties",
                    field
                ),
                vec![name.clone()],
                "additionalProperties",
            )),
            None => {}
        }
    }
}

fn check_array(items: &[Value], schema: &Map<String, Value>, path: &str, out: &mut Vec<SchemaViolation>) {
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            out.push(SchemaViolation::new(
                path,
                format!("{}: there must be a minimum of {} items in the array", path, min),
                vec![min.to_string()],
                "minItems",
            ));
        }
    }
    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max {
            out.push(SchemaViolation::new(
                path,
                format!("{}: there must be a maximum of {} items in the array", path, max),
                vec![max.to_string()],
                "maxItems",
            ));
        }
    }
    if let Some(item_schema) = schema.get("items") {
        for (i, item) in items.iter().enumerate() {
            check(item, item_schema, &format!("{}[{}]", path, i), out);
        }
    }
}

fn check_number(n: f64, schema: &Map<String, Value>, path: &str, out: &mut Vec<SchemaViolation>) {
    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if n < min {
            out.push(SchemaViolation::new(
                path,
                format!("{}: must have a minimum value of {}", path, min),
                vec![min.to_string()],
                "minimum",
            ));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if n > max {
            out.push(SchemaViolation::new(
                path,
                format!("{}: must have a maximum value of {}", path, max),
                vec![max.to_string()],
                "maximum",
            ));
        }
    }
}

fn check_string(s: &str, schema: &Map<String, Value>, path: &str, out: &mut Vec<SchemaViolation>) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            out.push(SchemaViolation::new(
                path,
                format!("{}: must be at least {} characters long", path, min),
                vec![min.to_string()],
                "minLength",
            ));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            out.push(SchemaViolation::new(
                path,
                format!("{}: may only be {} characters long", path, max),
                vec![max.to_string()],
                "maxLength",
            ));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(s) => out.push(SchemaViolation::new(
                path,
                format!("{}: does not match the regex pattern {}", path, pattern),
                vec![pattern.to_string()],
                "pattern",
            )),
            Ok(_) => {}
            Err(e) => warn!("Ignoring invalid schema pattern '{}' at {}: {}", pattern, path, e),
        }
    }
}
