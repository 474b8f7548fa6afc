//! # Schema validation and coercion
//!
//! Tool arguments and structured agent outputs are described with JSON
//! Schema. [`Schema`] wraps such a document and validates values against it
//! in two passes:
//!
//! 1. a coercion pass walks the schema (`type`, `properties`, `items` in both
//!    list and tuple form, `allOf` / `anyOf` / `oneOf`, local `$ref`s) and
//!    converts the loosely typed values an oracle tends to produce into the
//!    shape the schema asks for,
//! 2. the coerced value is then checked with [`jsonschema`], which enforces
//!    every keyword of the document.
//!
//! Coercions applied when the raw value does not already match:
//!
//! - a numeric string becomes a number (`"42"` for an `integer` schema),
//! - `"true"` / `"false"` become booleans,
//! - an integral float such as `3.0` becomes an integer,
//! - a string holding JSON is parsed when the schema wants an object or array.
//!
//! Validation either returns the fully coerced value or an error naming the
//! path of the first violation. A partially coerced value is never returned.
//!
//! ```rust
//! use agents_runtime::schema::Schema;
//! use serde_json::json;
//!
//! let schema = Schema::from_value(json!({
//!     "type": "object",
//!     "properties": { "result": { "type": "integer" } },
//!     "required": ["result"]
//! }));
//!
//! let value = schema.validate(&json!({ "result": "86" })).unwrap();
//! assert_eq!(value, json!({ "result": 86 }));
//!
//! let err = schema.validate(&json!({})).unwrap_err();
//! assert_eq!(err.path, "$");
//! ```

use std::fmt;

use jsonschema::error::ValidationErrorKind;
use jsonschema::ValidationError;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// A validation failure with the JSON path of the offending value.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{path}: {message}")]
pub struct SchemaValidationError {
    /// Path such as `$.items[2].name`
    pub path: String,
    pub message: String,
}

impl SchemaValidationError {
    pub(crate) fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }

    fn from_violation(error: &ValidationError<'_>, instance: &Value) -> Self {
        let mut path = json_path(&error.instance_path.to_string(), instance);
        // Reported on the object itself; point at the offending property.
        if let ValidationErrorKind::AdditionalProperties { unexpected } = &error.kind {
            if let Some(name) = unexpected.first() {
                path.push('.');
                path.push_str(name);
            }
        }
        Self {
            path,
            message: error.to_string(),
        }
    }
}

/// A JSON Schema document.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(Value);

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema({})", self.0)
    }
}

impl Schema {
    /// Derives the schema of `T` with `schemars`.
    pub fn of<T: JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        Self(serde_json::to_value(root).unwrap_or(Value::Bool(true)))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Accepts any value.
    pub fn any() -> Self {
        Self(Value::Bool(true))
    }

    /// An object with a single required string property.
    pub fn single_string(property: &str, description: &str) -> Self {
        let mut props = Map::new();
        props.insert(
            property.to_string(),
            serde_json::json!({ "type": "string", "description": description }),
        );
        Self(serde_json::json!({
            "type": "object",
            "properties": props,
            "required": [property],
            "additionalProperties": false
        }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// The `title` of the schema, if any.
    pub fn title(&self) -> Option<&str> {
        self.0.get("title").and_then(Value::as_str)
    }

    /// Validates `value`, returning the coerced value on success.
    pub fn validate(&self, value: &Value) -> Result<Value, SchemaValidationError> {
        let validator = jsonschema::Validator::new(&self.0)
            .map_err(|e| SchemaValidationError::new("$", format!("invalid schema: {e}")))?;
        let coerced = Coercer { root: &self.0 }
            .coerce(&self.0, value, 0)
            .unwrap_or_else(|| value.clone());
        let violation = validator
            .iter_errors(&coerced)
            .next()
            .map(|error| SchemaValidationError::from_violation(&error, &coerced));
        match violation {
            Some(error) => Err(error),
            None => Ok(coerced),
        }
    }

    /// Validates `value` and deserializes the coerced result into `T`.
    pub fn validate_as<T: DeserializeOwned>(
        &self,
        value: &Value,
    ) -> Result<T, SchemaValidationError> {
        let coerced = self.validate(value)?;
        serde_json::from_value(coerced).map_err(|e| SchemaValidationError::new("$", e.to_string()))
    }
}

impl From<Value> for Schema {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Turns a JSON pointer such as `/items/2/name` into `$.items[2].name`,
/// using `instance` to tell array indices from object keys.
fn json_path(pointer: &str, instance: &Value) -> String {
    let mut path = String::from("$");
    let mut node = Some(instance);
    for raw in pointer.split('/').skip(1) {
        let segment = raw.replace("~1", "/").replace("~0", "~");
        match node {
            Some(Value::Array(items)) => {
                path.push_str(&format!("[{segment}]"));
                node = segment.parse::<usize>().ok().and_then(|i| items.get(i));
            }
            other => {
                path.push('.');
                path.push_str(&segment);
                node = other.and_then(|v| v.get(segment.as_str()));
            }
        }
    }
    path
}

const MAX_REF_DEPTH: usize = 64;

/// Best-effort conversion of a value towards the types a schema asks for.
/// Constraint checking is left to `jsonschema`.
struct Coercer<'a> {
    root: &'a Value,
}

impl<'a> Coercer<'a> {
    /// `None` when `value` cannot take any shape the schema allows.
    fn coerce(&self, schema: &'a Value, value: &Value, depth: usize) -> Option<Value> {
        let obj = match schema {
            Value::Bool(false) => return None,
            Value::Object(obj) if depth < MAX_REF_DEPTH => obj,
            _ => return Some(value.clone()),
        };

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            return match self.resolve_ref(reference) {
                Some(target) => self.coerce(target, value, depth + 1),
                None => Some(value.clone()),
            };
        }

        let mut current = value.clone();

        if let Some(subschemas) = obj.get("allOf").and_then(Value::as_array) {
            for sub in subschemas {
                current = self.coerce(sub, &current, depth + 1)?;
            }
        }
        for keyword in ["anyOf", "oneOf"] {
            if let Some(subschemas) = obj.get(keyword).and_then(Value::as_array) {
                current = self.first_fit(subschemas, &current, depth)?;
            }
        }

        if let Some(types) = obj.get("type") {
            let allowed: Vec<&str> = match types {
                Value::String(t) => vec![t.as_str()],
                Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            if !allowed.is_empty() {
                current = coerce_to_types(&current, &allowed)?;
            }
        }

        match &mut current {
            Value::Array(items) => match obj.get("items") {
                Some(Value::Array(tuple)) => {
                    for (item, item_schema) in items.iter_mut().zip(tuple) {
                        self.coerce_in_place(item_schema, item, depth);
                    }
                }
                Some(item_schema) => {
                    for item in items.iter_mut() {
                        self.coerce_in_place(item_schema, item, depth);
                    }
                }
                None => {}
            },
            Value::Object(fields) => {
                if let Some(required) = obj.get("required").and_then(Value::as_array) {
                    let missing = required
                        .iter()
                        .filter_map(Value::as_str)
                        .any(|name| !fields.contains_key(name));
                    if missing {
                        return None;
                    }
                }
                let properties = obj.get("properties").and_then(Value::as_object);
                let additional = obj.get("additionalProperties").filter(|a| a.is_object());
                for (name, field) in fields.iter_mut() {
                    if let Some(field_schema) = properties.and_then(|p| p.get(name)).or(additional) {
                        self.coerce_in_place(field_schema, field, depth);
                    }
                }
            }
            _ => {}
        }

        Some(current)
    }

    fn coerce_in_place(&self, schema: &'a Value, slot: &mut Value, depth: usize) {
        if let Some(coerced) = self.coerce(schema, slot, depth + 1) {
            *slot = coerced;
        }
    }

    // Exact fits win over coerced ones so `["integer", "string"]`-style unions
    // keep a string that happens to look numeric.
    fn first_fit(&self, subschemas: &'a [Value], value: &Value, depth: usize) -> Option<Value> {
        let fits: Vec<Value> = subschemas
            .iter()
            .filter_map(|sub| self.coerce(sub, value, depth + 1))
            .collect();
        if fits.is_empty() {
            return None;
        }
        let exact = fits.iter().position(|v| v == value).unwrap_or(0);
        fits.into_iter().nth(exact)
    }

    fn resolve_ref(&self, reference: &str) -> Option<&'a Value> {
        if reference == "#" {
            return Some(self.root);
        }
        let pointer = reference.strip_prefix('#')?;
        self.root.pointer(pointer)
    }
}

fn coerce_to_types(value: &Value, allowed: &[&str]) -> Option<Value> {
    if allowed.iter().any(|t| matches_type(value, t)) {
        return Some(value.clone());
    }
    allowed.iter().find_map(|t| coerce(value, t))
}

fn matches_type(value: &Value, ty: &str) -> bool {
    match ty {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn coerce(value: &Value, ty: &str) -> Option<Value> {
    match (ty, value) {
        ("integer", Value::Number(n)) => integral(n.as_f64()?),
        ("integer", Value::String(s)) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Some(Value::from(i));
            }
            integral(trimmed.parse::<f64>().ok()?)
        }
        ("number", Value::String(s)) => {
            let trimmed = s.trim();
            if let Ok(i) = trimmed.parse::<i64>() {
                return Some(Value::from(i));
            }
            let f = trimmed.parse::<f64>().ok()?;
            Number::from_f64(f).map(Value::Number)
        }
        ("boolean", Value::String(s)) => match s.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        ("object", Value::String(s)) => {
            serde_json::from_str::<Value>(s).ok().filter(Value::is_object)
        }
        ("array", Value::String(s)) => {
            serde_json::from_str::<Value>(s).ok().filter(Value::is_array)
        }
        _ => None,
    }
}

fn integral(f: f64) -> Option<Value> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(Value::from(f as i64))
    } else {
        None
    }
}
