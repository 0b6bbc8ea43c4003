//! Schema-Compiled Validators
//!
//! Compiles a JSON-Schema fragment into a tree of [`Validator`] nodes at
//! model-registration time. Evaluation is a plain tree walk - the schema is
//! never re-interpreted per value.
//!
//! Supported subset: `object`, `array`, `string`, `integer`, `number`,
//! `boolean`, `enum`, `pattern`, `uniqueItems`, `required`. A node with an
//! unknown or missing `type` accepts any value.
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use stratum_hiera::Validator;
//!
//! let validator = Validator::compile(&json!({
//!     "type": "object",
//!     "properties": {
//!         "host": { "type": "string" },
//!         "port": { "type": "integer" }
//!     },
//!     "required": ["host"]
//! })).unwrap();
//!
//! assert!(validator.validate(&json!({"host": "db1", "port": 5432})).is_ok());
//! assert!(validator.validate(&json!({"port": 5432})).is_err());
//! ```

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::HieraError;

/// Compilation policy flags
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaOptions {
    /// Reject object fields that are not declared in `properties`.
    /// Extra fields are accepted by default.
    pub deny_unknown_fields: bool,
}

/// A compiled validator node
///
/// Validation returns the normalised value: `uniqueItems` arrays are
/// deduplicated (set semantics, first occurrence wins) and object fields
/// are rebuilt from their per-property validators.
#[derive(Debug, Clone)]
pub enum Validator {
    /// Unknown or missing `type` - accepts any value
    Any,
    Boolean,
    Integer,
    /// Any JSON number; integers are accepted as numbers
    Number,
    String {
        /// Anchored pattern - the value must match in full
        pattern: Option<Regex>,
    },
    Enum {
        literals: Vec<Value>,
    },
    Array {
        element: Box<Validator>,
        unique: bool,
    },
    Object {
        properties: BTreeMap<String, Validator>,
        required: BTreeSet<String>,
        deny_unknown: bool,
    },
}

impl Validator {
    /// Compile a schema fragment with default options
    pub fn compile(schema: &Value) -> Result<Self, HieraError> {
        Self::compile_with(schema, SchemaOptions::default())
    }

    /// Compile a schema fragment
    pub fn compile_with(schema: &Value, options: SchemaOptions) -> Result<Self, HieraError> {
        let node = schema
            .as_object()
            .ok_or_else(|| HieraError::invalid_schema("schema must be a JSON object"))?;

        // `enum` takes precedence over `type`
        if let Some(literals) = node.get("enum") {
            let literals = literals
                .as_array()
                .ok_or_else(|| HieraError::invalid_schema("'enum' must be an array"))?;
            if literals.is_empty() {
                return Err(HieraError::invalid_schema("'enum' must not be empty"));
            }
            return Ok(Validator::Enum {
                literals: literals.clone(),
            });
        }

        match node.get("type").and_then(Value::as_str) {
            Some("boolean") => Ok(Validator::Boolean),
            Some("integer") => Ok(Validator::Integer),
            Some("number") => Ok(Validator::Number),
            Some("string") => {
                let pattern = match node.get("pattern") {
                    Some(pattern) => {
                        let raw = pattern
                            .as_str()
                            .ok_or_else(|| HieraError::invalid_schema("'pattern' must be a string"))?;
                        // Anchor so values must match the pattern in full
                        let regex = Regex::new(&format!("^(?:{raw})$")).map_err(|err| {
                            HieraError::invalid_schema(format!("invalid pattern {raw:?}: {err}"))
                        })?;
                        Some(regex)
                    }
                    None => None,
                };
                Ok(Validator::String { pattern })
            }
            Some("array") => {
                let element = match node.get("items") {
                    Some(items) => Self::compile_with(items, options)?,
                    None => Validator::Any,
                };
                let unique = node
                    .get("uniqueItems")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(Validator::Array {
                    element: Box::new(element),
                    unique,
                })
            }
            Some("object") => {
                let mut properties = BTreeMap::new();
                if let Some(props) = node.get("properties") {
                    let props = props
                        .as_object()
                        .ok_or_else(|| HieraError::invalid_schema("'properties' must be an object"))?;
                    for (name, prop_schema) in props {
                        properties.insert(name.clone(), Self::compile_with(prop_schema, options)?);
                    }
                }
                let mut required = BTreeSet::new();
                if let Some(names) = node.get("required") {
                    let names = names
                        .as_array()
                        .ok_or_else(|| HieraError::invalid_schema("'required' must be an array"))?;
                    for name in names {
                        let name = name.as_str().ok_or_else(|| {
                            HieraError::invalid_schema("'required' entries must be strings")
                        })?;
                        if !properties.contains_key(name) {
                            return Err(HieraError::invalid_schema(format!(
                                "required field '{name}' is not declared in properties"
                            )));
                        }
                        required.insert(name.to_string());
                    }
                }
                Ok(Validator::Object {
                    properties,
                    required,
                    deny_unknown: options.deny_unknown_fields,
                })
            }
            // Unknown or missing type: accept any value
            _ => Ok(Validator::Any),
        }
    }

    /// Validate a value, returning the normalised form
    pub fn validate(&self, value: &Value) -> Result<Value, HieraError> {
        self.check(value, "$")
    }

    fn check(&self, value: &Value, path: &str) -> Result<Value, HieraError> {
        match self {
            Validator::Any => Ok(value.clone()),
            Validator::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                other => Err(HieraError::violation(path, "boolean", type_name(other))),
            },
            Validator::Integer => match value {
                Value::Number(number) if number.is_i64() || number.is_u64() => Ok(value.clone()),
                Value::Number(_) => Err(HieraError::violation(path, "integer", "number")),
                other => Err(HieraError::violation(path, "integer", type_name(other))),
            },
            Validator::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                other => Err(HieraError::violation(path, "number", type_name(other))),
            },
            Validator::String { pattern } => match value {
                Value::String(text) => {
                    if let Some(regex) = pattern {
                        if !regex.is_match(text) {
                            return Err(HieraError::violation(
                                path,
                                format!("string matching {}", regex.as_str()),
                                format!("{text:?}"),
                            ));
                        }
                    }
                    Ok(value.clone())
                }
                other => Err(HieraError::violation(path, "string", type_name(other))),
            },
            Validator::Enum { literals } => {
                if literals.contains(value) {
                    Ok(value.clone())
                } else {
                    let allowed = literals
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    Err(HieraError::violation(
                        path,
                        format!("one of [{allowed}]"),
                        value.to_string(),
                    ))
                }
            }
            Validator::Array { element, unique } => {
                let items = value
                    .as_array()
                    .ok_or_else(|| HieraError::violation(path, "array", type_name(value)))?;
                let mut normalised = Vec::with_capacity(items.len());
                for (index, item) in items.iter().enumerate() {
                    let checked = element.check(item, &format!("{path}[{index}]"))?;
                    // Set semantics: duplicates collapse, first occurrence wins
                    if *unique && normalised.contains(&checked) {
                        continue;
                    }
                    normalised.push(checked);
                }
                Ok(Value::Array(normalised))
            }
            Validator::Object {
                properties,
                required,
                deny_unknown,
            } => {
                let fields = value
                    .as_object()
                    .ok_or_else(|| HieraError::violation(path, "object", type_name(value)))?;
                for name in required {
                    if !fields.contains_key(name) {
                        return Err(HieraError::violation(
                            format!("{path}.{name}"),
                            "a value",
                            "missing required field",
                        ));
                    }
                }
                let mut normalised = Map::new();
                for (name, field_value) in fields {
                    match properties.get(name) {
                        Some(validator) => {
                            let checked = validator.check(field_value, &format!("{path}.{name}"))?;
                            normalised.insert(name.clone(), checked);
                        }
                        None if *deny_unknown => {
                            return Err(HieraError::violation(
                                format!("{path}.{name}"),
                                "a declared field",
                                "unknown field",
                            ));
                        }
                        None => {
                            normalised.insert(name.clone(), field_value.clone());
                        }
                    }
                }
                Ok(Value::Object(normalised))
            }
        }
    }
}

/// JSON type name for error messages
pub fn type_name(value: &Value) -> &'static str {
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

    #[test]
    fn test_primitive_types() {
        let validator = Validator::compile(&json!({"type": "integer"})).unwrap();
        assert_eq!(validator.validate(&json!(42)).unwrap(), json!(42));
        assert!(validator.validate(&json!(4.2)).is_err());
        assert!(validator.validate(&json!("42")).is_err());

        let validator = Validator::compile(&json!({"type": "number"})).unwrap();
        assert!(validator.validate(&json!(4.2)).is_ok());
        assert!(validator.validate(&json!(42)).is_ok());
        assert!(validator.validate(&json!(true)).is_err());

        let validator = Validator::compile(&json!({"type": "boolean"})).unwrap();
        assert!(validator.validate(&json!(false)).is_ok());
        assert!(validator.validate(&json!(0)).is_err());

        let validator = Validator::compile(&json!({"type": "string"})).unwrap();
        assert!(validator.validate(&json!("x")).is_ok());
        assert!(validator.validate(&json!(1)).is_err());
    }

    #[test]
    fn test_unknown_type_is_open() {
        let validator = Validator::compile(&json!({})).unwrap();
        assert!(validator.validate(&json!({"anything": [1, 2]})).is_ok());
        assert!(validator.validate(&json!(null)).is_ok());

        let validator = Validator::compile(&json!({"type": "timestamp"})).unwrap();
        assert!(validator.validate(&json!("2024-01-01")).is_ok());
    }

    #[test]
    fn test_enum_literals() {
        let validator = Validator::compile(&json!({"enum": ["a", "b", 3]})).unwrap();
        assert!(validator.validate(&json!("a")).is_ok());
        assert!(validator.validate(&json!(3)).is_ok());
        assert!(validator.validate(&json!("c")).is_err());
    }

    #[test]
    fn test_empty_enum_rejected() {
        assert!(matches!(
            Validator::compile(&json!({"enum": []})),
            Err(HieraError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_pattern_matches_in_full() {
        let validator =
            Validator::compile(&json!({"type": "string", "pattern": "[a-z]+"})).unwrap();
        assert!(validator.validate(&json!("abc")).is_ok());
        // A substring match is not enough
        assert!(validator.validate(&json!("abc1")).is_err());
        assert!(validator.validate(&json!("1abc")).is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(matches!(
            Validator::compile(&json!({"type": "string", "pattern": "("})),
            Err(HieraError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_unique_items_deduplicate() {
        let validator = Validator::compile(&json!({
            "type": "array",
            "items": {"type": "string"},
            "uniqueItems": true
        }))
        .unwrap();
        assert_eq!(
            validator.validate(&json!(["a", "b", "a", "c", "b"])).unwrap(),
            json!(["a", "b", "c"])
        );
    }

    #[test]
    fn test_array_item_errors_carry_path() {
        let validator = Validator::compile(&json!({
            "type": "array",
            "items": {"type": "integer"}
        }))
        .unwrap();
        let err = validator.validate(&json!([1, "two"])).unwrap_err();
        match err {
            HieraError::SchemaViolation { path, .. } => assert_eq!(path, "$[1]"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nested_object_required() {
        let validator = Validator::compile(&json!({
            "type": "object",
            "properties": {
                "db": {
                    "type": "object",
                    "properties": {
                        "host": {"type": "string"},
                        "port": {"type": "integer"}
                    },
                    "required": ["host"]
                }
            },
            "required": ["db"]
        }))
        .unwrap();

        assert!(validator
            .validate(&json!({"db": {"host": "a", "port": 1}}))
            .is_ok());

        let err = validator.validate(&json!({"db": {"port": 1}})).unwrap_err();
        match err {
            HieraError::SchemaViolation { path, .. } => assert_eq!(path, "$.db.host"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_extra_fields_allowed_by_default() {
        let validator = Validator::compile(&json!({
            "type": "object",
            "properties": {"a": {"type": "string"}}
        }))
        .unwrap();
        let normalised = validator
            .validate(&json!({"a": "x", "extra": true}))
            .unwrap();
        assert_eq!(normalised["extra"], json!(true));
    }

    #[test]
    fn test_deny_unknown_fields() {
        let validator = Validator::compile_with(
            &json!({
                "type": "object",
                "properties": {"a": {"type": "string"}}
            }),
            SchemaOptions {
                deny_unknown_fields: true,
            },
        )
        .unwrap();
        assert!(validator.validate(&json!({"a": "x"})).is_ok());
        assert!(validator.validate(&json!({"a": "x", "extra": 1})).is_err());
    }

    #[test]
    fn test_required_must_be_declared() {
        assert!(matches!(
            Validator::compile(&json!({
                "type": "object",
                "properties": {},
                "required": ["ghost"]
            })),
            Err(HieraError::InvalidSchema { .. })
        ));
    }
}
