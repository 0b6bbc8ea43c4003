//! Key Records

use serde::{Deserialize, Serialize};

/// A user-facing configuration key bound to a key model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyRecord {
    pub id: String,

    /// Prefixed id of the model validating this key's values; must resolve
    /// in the key-model registry at read time
    pub key_model_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub deprecated: bool,
}

/// Sparse update for a key; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_model_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<bool>,
}

/// Filters for key searches; `None` fields do not filter
#[derive(Debug, Clone, Default)]
pub struct KeyQuery {
    pub key_model_id: Option<String>,
    pub deprecated: Option<bool>,
}
