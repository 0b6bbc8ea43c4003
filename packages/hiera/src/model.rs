//! Key Models
//!
//! A key model is a named validator for the shape of a key's value. Four
//! built-in ("static") primitive models ship with the engine; user-defined
//! ("dynamic") models are compiled from JSON-Schema fragments via
//! [`SchemaModel`].
//!
//! Model ids are namespaced: `static:<name>` for built-ins and
//! `dynamic:<name>` for user-defined models. Ids form one disjoint union
//! across both prefixes.

use serde_json::Value;

use crate::error::HieraError;
use crate::schema::{type_name, SchemaOptions, Validator};

/// Prefix for built-in model ids
pub const STATIC_MODEL_PREFIX: &str = "static:";

/// Prefix for user-defined model ids
pub const DYNAMIC_MODEL_PREFIX: &str = "dynamic:";

/// A named validator for key values
///
/// Implementations must be `Send + Sync`; models are shared across lookup
/// tasks behind `Arc`.
pub trait KeyModel: Send + Sync {
    /// Human-readable description of the model
    fn description(&self) -> &str;

    /// Validate `data`, returning the normalised value
    fn validate(&self, data: &Value) -> Result<Value, HieraError>;
}

macro_rules! simple_model {
    ($name:ident, $description:literal, $expected:literal, $accepts:pat) => {
        #[doc = concat!("Built-in ", $description, " model")]
        pub struct $name;

        impl KeyModel for $name {
            fn description(&self) -> &str {
                $description
            }

            fn validate(&self, data: &Value) -> Result<Value, HieraError> {
                match data {
                    $accepts => Ok(data.clone()),
                    other => Err(HieraError::violation("$", $expected, type_name(other))),
                }
            }
        }
    };
}

simple_model!(SimpleString, "simple string", "string", Value::String(_));
simple_model!(SimpleBool, "simple bool", "boolean", Value::Bool(_));
simple_model!(SimpleFloat, "simple float", "number", Value::Number(_));

/// Built-in simple int model
pub struct SimpleInt;

impl KeyModel for SimpleInt {
    fn description(&self) -> &str {
        "simple int"
    }

    fn validate(&self, data: &Value) -> Result<Value, HieraError> {
        match data {
            Value::Number(number) if number.is_i64() || number.is_u64() => Ok(data.clone()),
            other => Err(HieraError::violation("$", "integer", type_name(other))),
        }
    }
}

/// A user-defined model backed by a compiled schema
pub struct SchemaModel {
    description: String,
    validator: Validator,
}

impl SchemaModel {
    /// Compile a schema fragment into a model
    pub fn new(description: impl Into<String>, schema: &Value) -> Result<Self, HieraError> {
        Self::with_options(description, schema, SchemaOptions::default())
    }

    /// Compile a schema fragment with explicit policy flags
    pub fn with_options(
        description: impl Into<String>,
        schema: &Value,
        options: SchemaOptions,
    ) -> Result<Self, HieraError> {
        Ok(Self {
            description: description.into(),
            validator: Validator::compile_with(schema, options)?,
        })
    }
}

impl KeyModel for SchemaModel {
    fn description(&self) -> &str {
        &self.description
    }

    fn validate(&self, data: &Value) -> Result<Value, HieraError> {
        self.validator.validate(data)
    }
}

/// Split a model id into its prefix and bare name
///
/// An unprefixed id resolves under the static prefix.
pub fn split_model_id(id: &str) -> (&'static str, &str) {
    if let Some(name) = id.strip_prefix(DYNAMIC_MODEL_PREFIX) {
        return (DYNAMIC_MODEL_PREFIX, name);
    }
    if let Some(name) = id.strip_prefix(STATIC_MODEL_PREFIX) {
        return (STATIC_MODEL_PREFIX, name);
    }
    (STATIC_MODEL_PREFIX, id)
}

/// Canonical prefixed form of a model id
pub fn qualify_model_id(id: &str) -> String {
    let (prefix, name) = split_model_id(id);
    format!("{prefix}{name}")
}

/// Whether this id names a user-defined model
pub fn is_dynamic_model_id(id: &str) -> bool {
    id.starts_with(DYNAMIC_MODEL_PREFIX)
}

/// The four built-in models, keyed by their prefixed ids
pub fn builtin_models() -> Vec<(String, std::sync::Arc<dyn KeyModel>)> {
    vec![
        (
            format!("{STATIC_MODEL_PREFIX}SimpleString"),
            std::sync::Arc::new(SimpleString) as std::sync::Arc<dyn KeyModel>,
        ),
        (
            format!("{STATIC_MODEL_PREFIX}SimpleInt"),
            std::sync::Arc::new(SimpleInt) as std::sync::Arc<dyn KeyModel>,
        ),
        (
            format!("{STATIC_MODEL_PREFIX}SimpleFloat"),
            std::sync::Arc::new(SimpleFloat) as std::sync::Arc<dyn KeyModel>,
        ),
        (
            format!("{STATIC_MODEL_PREFIX}SimpleBool"),
            std::sync::Arc::new(SimpleBool) as std::sync::Arc<dyn KeyModel>,
        ),
    ]
}
