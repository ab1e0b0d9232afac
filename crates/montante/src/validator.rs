//! JSON payload validation against composed schemas.
//!
//! Implements the Draft 4 keywords the composed schemas use: `type`, `enum`,
//! `required`, `properties`, `additionalProperties`, `items`, `minItems`,
//! `maxItems`, `minimum` and `maximum`. Unknown keywords are ignored.
//!
//! Every violation is reported, not just the first. Messages use the same
//! wording as Python's `jsonschema`, so existing clients can keep matching on
//! them.
//!
//! # Example
//!
//! ```
//! use montante::{validate, PathSegment};
//! use serde_json::json;
//!
//! let schema = json!({"type": "object", "required": ["target"]});
//! let errors = validate(&schema, &json!({}));
//!
//! assert_eq!(errors.len(), 1);
//! assert_eq!(errors[0].schema_path, [PathSegment::from("required")]);
//! assert_eq!(errors[0].message, "'target' is a required property");
//! ```

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step of a path into a schema or an instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Array position.
    Index(usize),
    /// Object key.
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Key(k) => f.write_str(k),
        }
    }
}

/// A single schema violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Absolute path from the schema root to the failing keyword.
    pub schema_path: Vec<PathSegment>,
    /// Path from the payload root to the offending value.
    pub instance_path: Vec<PathSegment>,
    /// Human-readable description.
    pub message: String,
}

impl ValidationError {
    /// Creates an error.
    pub fn new(
        schema_path: Vec<PathSegment>,
        instance_path: Vec<PathSegment>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            schema_path,
            instance_path,
            message: message.into(),
        }
    }

    /// The schema path joined with `/`.
    #[must_use]
    pub fn schema_pointer(&self) -> String {
        join(&self.schema_path)
    }

    /// The instance path joined with `/`.
    #[must_use]
    pub fn instance_pointer(&self) -> String {
        join(&self.instance_path)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at /{})", self.message, self.schema_pointer())
    }
}

fn join(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("/")
}

/// Validates `instance` against `schema`.
///
/// Returns every violation, sorted by schema path and then instance path.
/// An empty list means the payload is valid. Never panics.
#[must_use]
pub fn validate(schema: &Value, instance: &Value) -> Vec<ValidationError> {
    let mut walker = Walker {
        schema_path: Vec::new(),
        instance_path: Vec::new(),
        errors: Vec::new(),
    };
    walker.walk(schema, instance);

    let mut errors = walker.errors;
    sort_errors(&mut errors);
    errors
}

/// Orders errors by schema path, then instance path.
pub(crate) fn sort_errors(errors: &mut [ValidationError]) {
    errors.sort_by(|a, b| match a.schema_path.cmp(&b.schema_path) {
        Ordering::Equal => a.instance_path.cmp(&b.instance_path),
        other => other,
    });
}

struct Walker {
    schema_path: Vec<PathSegment>,
    instance_path: Vec<PathSegment>,
    errors: Vec<ValidationError>,
}

impl Walker {
    fn report(&mut self, keyword: &str, message: String) {
        let mut schema_path = self.schema_path.clone();
        schema_path.push(PathSegment::from(keyword));
        self.errors.push(ValidationError {
            schema_path,
            instance_path: self.instance_path.clone(),
            message,
        });
    }

    fn walk(&mut self, schema: &Value, instance: &Value) {
        let Value::Object(schema) = schema else {
            return;
        };

        if let Some(expected) = schema.get("type") {
            self.check_type(expected, instance);
        }
        if let Some(Value::Array(allowed)) = schema.get("enum") {
            if !allowed.iter().any(|v| json_equal(v, instance)) {
                let message = format!(
                    "{} is not one of {}",
                    py_repr(instance),
                    py_repr(&Value::Array(allowed.clone()))
                );
                self.report("enum", message);
            }
        }

        match instance {
            Value::Object(object) => self.check_object(schema, object),
            Value::Array(items) => self.check_array(schema, items),
            Value::Number(_) => self.check_number(schema, instance),
            _ => {}
        }
    }

    fn check_type(&mut self, expected: &Value, instance: &Value) {
        let names: Vec<&str> = match expected {
            Value::String(name) => vec![name.as_str()],
            Value::Array(names) => names.iter().filter_map(Value::as_str).collect(),
            _ => return,
        };
        if names.iter().any(|name| is_type(instance, name)) {
            return;
        }
        let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
        self.report(
            "type",
            format!("{} is not of type {}", py_repr(instance), quoted.join(", ")),
        );
    }

    fn check_object(&mut self, schema: &Map<String, Value>, object: &Map<String, Value>) {
        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(name) {
                    self.report("required", format!("'{name}' is a required property"));
                }
            }
        }

        let properties = match schema.get("properties") {
            Some(Value::Object(properties)) => Some(properties),
            _ => None,
        };
        if let Some(properties) = properties {
            for (name, subschema) in properties {
                if let Some(value) = object.get(name) {
                    self.schema_path.push(PathSegment::from("properties"));
                    self.schema_path.push(PathSegment::from(name.as_str()));
                    self.instance_path.push(PathSegment::from(name.as_str()));
                    self.walk(subschema, value);
                    self.instance_path.pop();
                    self.schema_path.pop();
                    self.schema_path.pop();
                }
            }
        }

        match schema.get("additionalProperties") {
            Some(Value::Bool(false)) => {
                let extra: Vec<String> = object
                    .keys()
                    .filter(|k| properties.is_none_or(|p| !p.contains_key(*k)))
                    .map(|k| format!("'{k}'"))
                    .collect();
                if !extra.is_empty() {
                    let verb = if extra.len() == 1 { "was" } else { "were" };
                    self.report(
                        "additionalProperties",
                        format!(
                            "Additional properties are not allowed ({} {verb} unexpected)",
                            extra.join(", ")
                        ),
                    );
                }
            }
            Some(extra_schema @ Value::Object(_)) => {
                for (name, value) in object {
                    if properties.is_some_and(|p| p.contains_key(name)) {
                        continue;
                    }
                    self.schema_path.push(PathSegment::from("additionalProperties"));
                    self.instance_path.push(PathSegment::from(name.as_str()));
                    self.walk(extra_schema, value);
                    self.instance_path.pop();
                    self.schema_path.pop();
                }
            }
            _ => {}
        }
    }

    fn check_array(&mut self, schema: &Map<String, Value>, items: &[Value]) {
        if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                self.report("minItems", format!("{} is too short", py_repr(&Value::Array(items.to_vec()))));
            }
        }
        if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max {
                self.report("maxItems", format!("{} is too long", py_repr(&Value::Array(items.to_vec()))));
            }
        }

        match schema.get("items") {
            Some(item_schema @ Value::Object(_)) => {
                self.schema_path.push(PathSegment::from("items"));
                for (i, item) in items.iter().enumerate() {
                    self.instance_path.push(PathSegment::Index(i));
                    self.walk(item_schema, item);
                    self.instance_path.pop();
                }
                self.schema_path.pop();
            }
            Some(Value::Array(tuple)) => {
                for (i, (item_schema, item)) in tuple.iter().zip(items).enumerate() {
                    self.schema_path.push(PathSegment::from("items"));
                    self.schema_path.push(PathSegment::Index(i));
                    self.instance_path.push(PathSegment::Index(i));
                    self.walk(item_schema, item);
                    self.instance_path.pop();
                    self.schema_path.pop();
                    self.schema_path.pop();
                }
            }
            _ => {}
        }
    }

    fn check_number(&mut self, schema: &Map<String, Value>, instance: &Value) {
        let Some(value) = instance.as_f64() else {
            return;
        };
        if let Some(min) = schema.get("minimum") {
            if let Some(bound) = min.as_f64() {
                let exclusive = schema.get("exclusiveMinimum") == Some(&Value::Bool(true));
                if value < bound || (exclusive && value == bound) {
                    let relation = if exclusive { "less than or equal to" } else { "less than" };
                    self.report(
                        "minimum",
                        format!("{} is {relation} the minimum of {}", py_repr(instance), py_repr(min)),
                    );
                }
            }
        }
        if let Some(max) = schema.get("maximum") {
            if let Some(bound) = max.as_f64() {
                let exclusive = schema.get("exclusiveMaximum") == Some(&Value::Bool(true));
                if value > bound || (exclusive && value == bound) {
                    let relation = if exclusive { "greater than or equal to" } else { "greater than" };
                    self.report(
                        "maximum",
                        format!("{} is {relation} the maximum of {}", py_repr(instance), py_repr(max)),
                    );
                }
            }
        }
    }
}

/// Draft 4 type check. `integer` excludes numbers written with a fraction
/// part, even `1.0`.
fn is_type(instance: &Value, name: &str) -> bool {
    match name {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        "number" => instance.is_number(),
        "integer" => instance.is_i64() || instance.is_u64(),
        "any" => true,
        _ => false,
    }
}

/// Equality as JSON Schema `enum` sees it: `1` and `1.0` are equal.
fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| json_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| json_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Renders a JSON value the way Python's `repr` renders the decoded value.
fn py_repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => py_str(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(py_repr).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", py_str(k), py_repr(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn py_str(s: &str) -> String {
    if s.contains('\'') && !s.contains('"') {
        format!("\"{s}\"")
    } else {
        format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn path(segments: &[&str]) -> Vec<PathSegment> {
        segments.iter().map(|s| PathSegment::from(*s)).collect()
    }

    #[test]
    fn test_valid_payload_has_no_errors() {
        let schema = json!({
            "type": "object",
            "required": ["a"],
            "properties": {"a": {"type": "integer", "minimum": 0}}
        });
        assert!(validate(&schema, &json!({"a": 3})).is_empty());
    }

    #[test]
    fn test_type_messages() {
        let schema = json!({"properties": {"n": {"type": "string"}}});
        let errors = validate(&schema, &json!({"n": 5}));
        assert_eq!(errors[0].message, "5 is not of type 'string'");
        assert_eq!(errors[0].schema_path, path(&["properties", "n", "type"]));
        assert_eq!(errors[0].instance_path, path(&["n"]));
    }

    #[test]
    fn test_integer_excludes_fractions() {
        let schema = json!({"type": "integer"});
        assert!(validate(&schema, &json!(4)).is_empty());
        assert_eq!(validate(&schema, &json!(4.0)).len(), 1);
        assert_eq!(validate(&schema, &json!("4")).len(), 1);
    }

    #[test]
    fn test_enum_message() {
        let schema = json!({"enum": ["C5.0"]});
        let errors = validate(&schema, &json!("xgb"));
        assert_eq!(errors[0].message, "'xgb' is not one of ['C5.0']");
        assert_eq!(errors[0].schema_path, path(&["enum"]));
    }

    #[test]
    fn test_nested_required_path() {
        let schema = json!({
            "type": "object",
            "properties": {"outer": {"type": "object", "required": ["inner"]}}
        });
        let errors = validate(&schema, &json!({"outer": {}}));
        assert_eq!(errors[0].schema_path, path(&["properties", "outer", "required"]));
        assert_eq!(errors[0].message, "'inner' is a required property");
    }

    #[test]
    fn test_items_paths_carry_indexes() {
        let schema = json!({"type": "array", "items": {"type": "string"}});
        let errors = validate(&schema, &json!(["a", 1, "b", 2]));
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].instance_path, vec![PathSegment::Index(1)]);
        assert_eq!(errors[1].instance_path, vec![PathSegment::Index(3)]);
        assert_eq!(errors[0].schema_path, path(&["items", "type"]));
    }

    #[test]
    fn test_additional_properties() {
        let schema = json!({
            "properties": {"a": {}},
            "additionalProperties": false
        });
        let errors = validate(&schema, &json!({"a": 1, "b": 2}));
        assert_eq!(
            errors[0].message,
            "Additional properties are not allowed ('b' was unexpected)"
        );
    }

    #[test]
    fn test_array_length_and_bounds() {
        let schema = json!({"type": "array", "minItems": 1});
        assert_eq!(validate(&schema, &json!([]))[0].message, "[] is too short");

        let schema = json!({"minimum": 0});
        assert_eq!(
            validate(&schema, &json!(-1))[0].message,
            "-1 is less than the minimum of 0"
        );
    }

    #[test]
    fn test_errors_sorted_by_schema_path() {
        let schema = json!({
            "type": "object",
            "required": ["z"],
            "properties": {
                "b": {"type": "string"},
                "a": {"type": "string"}
            }
        });
        let payload = json!({"a": 1, "b": 2});
        let errors = validate(&schema, &payload);
        let paths: Vec<String> = errors.iter().map(ValidationError::schema_pointer).collect();
        assert_eq!(paths, ["properties/a/type", "properties/b/type", "required"]);
        // stable across runs
        assert_eq!(errors, validate(&schema, &payload));
    }

    #[test]
    fn test_python_repr() {
        assert_eq!(py_repr(&json!(null)), "None");
        assert_eq!(py_repr(&json!(true)), "True");
        assert_eq!(py_repr(&json!({"k": [1, "x"]})), "{'k': [1, 'x']}");
        assert_eq!(py_repr(&json!("it's")), "\"it's\"");
    }

    #[test]
    fn test_path_segments_serialize_plainly() {
        let error = ValidationError {
            schema_path: vec![PathSegment::from("items"), PathSegment::Index(0)],
            instance_path: vec![],
            message: "m".into(),
        };
        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["schema_path"], json!(["items", 0]));
    }
}
