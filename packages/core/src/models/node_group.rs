//! Node Groups and Filter Rules
//!
//! A node group carries a DNF filter tree over node facts: a group matches
//! a node when any rule matches, a rule matches when all of its parts
//! match, and a part matches when the fact at its (possibly nested) path
//! is one of the allowed values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One AND-part of a filter rule: a fact path and its allowed values
///
/// The path is dot-separated for nested facts (e.g. `os.family`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterPart {
    pub fact: String,
    pub values: Vec<String>,
}

/// A conjunction of parts; one OR-branch of a group's filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilterRule {
    pub part: Vec<FilterPart>,
}

/// A stored node group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeGroup {
    pub id: String,

    /// Disjunction of conjunctions; a group with no filters is only ever
    /// populated manually
    #[serde(default)]
    pub filters: Vec<FilterRule>,

    /// Current member node ids, maintained by membership re-evaluation
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default)]
    pub teams: Vec<String>,
}

/// Sparse update for a node group; membership is never patched directly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeGroupPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<FilterRule>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub teams: Option<Vec<String>>,
}

/// A fact-ingestion event for one node
///
/// Produced by the external ingestion pipeline; consumed by membership
/// re-evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeFacts {
    pub certname: String,

    /// Nested fact document
    pub values: Value,

    pub environment: String,
    pub producer_timestamp: DateTime<Utc>,
    pub producer: String,
}
