//! Engine Error Types
//!
//! This module defines error types for the hiera engine primitives:
//! registry lookups, level template expansion and schema validation.

use thiserror::Error;

/// Hiera engine errors
///
/// Covers registry resolution, template expansion and data validation.
/// Store and orchestration failures are handled by service-layer error
/// types in `stratum-core`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HieraError {
    /// No key model registered under this id
    #[error("key model not found: {id}")]
    ModelNotFound { id: String },

    /// User-defined model id does not carry the `dynamic:` prefix
    #[error("invalid key model id {id}: user defined models must use the 'dynamic:' prefix")]
    InvalidModelId { id: String },

    /// Built-in models exist for the process lifetime
    #[error("key model {id} is built in and cannot be removed")]
    BuiltinModel { id: String },

    /// No key registered under this id
    #[error("key not found: {id}")]
    KeyNotFound { id: String },

    /// A level template placeholder has no matching fact
    #[error("missing fact '{fact}' to expand level {level_id}")]
    MissingFact { level_id: String, fact: String },

    /// The schema fragment itself is malformed
    #[error("invalid schema: {reason}")]
    InvalidSchema { reason: String },

    /// A value failed validation against a key model
    #[error("invalid data at {path}: expected {expected}, got {got}")]
    SchemaViolation {
        path: String,
        expected: String,
        got: String,
    },
}

impl HieraError {
    /// Create an invalid schema error
    pub fn invalid_schema(reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            reason: reason.into(),
        }
    }

    /// Create a schema violation error
    pub fn violation(
        path: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Self::SchemaViolation {
            path: path.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create a missing fact error
    pub fn missing_fact(level_id: impl Into<String>, fact: impl Into<String>) -> Self {
        Self::MissingFact {
            level_id: level_id.into(),
            fact: fact.into(),
        }
    }
}
