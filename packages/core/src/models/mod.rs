//! Stored Record Types
//!
//! Serde types for the documents held by the catalogue store, the patch
//! shapes accepted by the admin surface and the query parameters of the
//! search operations.

mod cache;
mod key;
mod key_model;
mod level;
mod level_data;
mod node_group;

pub use cache::{canonical_facts, FactPair, LookupCacheEntry};
pub use key::{KeyPatch, KeyQuery, KeyRecord};
pub use key_model::KeyModelRecord;
pub use level::{LevelPatch, LevelRecord};
pub use level_data::{
    LevelDataId, LevelDataPatch, LevelDataQuery, LevelDataRecord, LevelDataSort, SortOrder,
};
pub use node_group::{FilterPart, FilterRule, NodeFacts, NodeGroup, NodeGroupPatch};
