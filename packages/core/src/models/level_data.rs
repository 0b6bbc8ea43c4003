//! Level Data Records
//!
//! One concrete value of a key within a level for a specific fact
//! assignment. Identified by the composite `(level_id, expanded_id,
//! key_id)`; `priority` is denormalised from the level so lookup queries
//! can sort without a join.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratum_hiera::Facts;

/// A stored level-data row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelDataRecord {
    /// Owning level id (the template form, placeholders intact)
    pub level_id: String,

    /// `level_id` with all placeholders substituted; equals `level_id`
    /// when the template has none
    pub expanded_id: String,

    pub key_id: String,

    /// Exactly the facts named by the template's placeholders
    pub facts: Facts,

    /// The stored value, conforming to the key's model
    pub data: Value,

    /// Copied from the owning level; rewritten when the level's priority
    /// changes
    pub priority: i64,
}

/// Composite identity of a level-data row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LevelDataId {
    pub level_id: String,
    pub expanded_id: String,
    pub key_id: String,
}

impl LevelDataId {
    pub fn new(
        level_id: impl Into<String>,
        expanded_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            level_id: level_id.into(),
            expanded_id: expanded_id.into(),
            key_id: key_id.into(),
        }
    }
}

/// Sparse update for a level-data row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelDataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Sort field for level-data searches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelDataSort {
    #[default]
    ExpandedId,
    LevelId,
    KeyId,
    Priority,
}

impl LevelDataSort {
    /// Store field name
    pub fn field(self) -> &'static str {
        match self {
            LevelDataSort::ExpandedId => "expanded_id",
            LevelDataSort::LevelId => "level_id",
            LevelDataSort::KeyId => "key_id",
            LevelDataSort::Priority => "priority",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Filters, ordering and pagination for level-data searches
///
/// `None` filters do not constrain; `limit: None` disables pagination.
#[derive(Debug, Clone, Default)]
pub struct LevelDataQuery {
    pub key_id: Option<String>,
    pub level_id: Option<String>,
    pub expanded_id: Option<String>,
    /// Match rows whose fact map contains this `(name, value)` pair
    pub fact: Option<(String, String)>,
    pub sort: LevelDataSort,
    pub order: SortOrder,
    pub page: usize,
    pub limit: Option<usize>,
}
