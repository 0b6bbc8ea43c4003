//! Key Model Records
//!
//! A stored user-defined key model: a prefixed id plus the JSON-Schema
//! fragment it compiles from. Built-in (`static:`) models are process
//! constants and never persist; the admin surface serves them as read-only
//! descriptors in this same shape, with the primitive kind in `schema`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A key model document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyModelRecord {
    /// Prefixed model id (`dynamic:<name>`, or `static:<name>` for the
    /// built-in descriptors)
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON-Schema fragment for dynamic models; one of `"string"`,
    /// `"int"`, `"float"`, `"bool"` for the built-in descriptors
    pub schema: Value,
}
