//! Level Records

use serde::{Deserialize, Serialize};

/// A lookup scope with a priority
///
/// The id may embed `{fact}` placeholders (e.g. `stage/{stage}.yaml`).
/// Lower priority numbers take precedence. Both `id` and `priority` are
/// unique across levels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LevelRecord {
    pub id: String,

    /// Lookup precedence; lower numbers win
    pub priority: i64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Sparse update for a level; `None` fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
