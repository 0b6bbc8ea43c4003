//! Node-Group Membership
//!
//! Pure DNF filter evaluation plus the service that rewrites stored
//! memberships when a fact-ingestion event arrives.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::db::HieraStore;
use crate::models::{FilterPart, FilterRule, NodeFacts, NodeGroup};
use crate::registry::NodeGroupRegistry;
use crate::services::error::ServiceError;

/// Ids of the groups whose filter matches the given fact document, sorted
///
/// A group matches when any of its rules matches; a rule matches when all
/// of its parts match. Groups without filters never auto-match - they are
/// populated manually.
pub fn matching_groups<'a, I>(values: &Value, groups: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a NodeGroup>,
{
    let mut matched: Vec<String> = groups
        .into_iter()
        .filter(|group| {
            !group.filters.is_empty()
                && group.filters.iter().any(|rule| rule_matches(rule, values))
        })
        .map(|group| group.id.clone())
        .collect();
    matched.sort();
    matched
}

fn rule_matches(rule: &FilterRule, values: &Value) -> bool {
    rule.part.iter().all(|part| part_matches(part, values))
}

/// Walk the dot-separated fact path; the leaf must be a string contained
/// in the allowed values
fn part_matches(part: &FilterPart, values: &Value) -> bool {
    let mut current = values;
    for segment in part.fact.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return false,
        }
    }
    match current {
        Value::String(leaf) => part.values.iter().any(|allowed| allowed == leaf),
        _ => false,
    }
}

/// Recomputes and persists node-group memberships on fact ingestion
pub struct MembershipService {
    store: Arc<dyn HieraStore>,
    node_groups: Arc<NodeGroupRegistry>,
}

impl MembershipService {
    pub fn new(store: Arc<dyn HieraStore>, node_groups: Arc<NodeGroupRegistry>) -> Self {
        Self { store, node_groups }
    }

    /// Evaluate all group filters against the node's facts and rewrite
    /// stored memberships; returns the matching group ids
    pub async fn reevaluate(&self, facts: &NodeFacts) -> Result<Vec<String>, ServiceError> {
        let snapshot = self.node_groups.snapshot().await;
        let matched = matching_groups(&facts.values, snapshot.values());
        debug!(node = %facts.certname, groups = matched.len(), "membership evaluated");
        self.store
            .rewrite_group_membership(&facts.certname, &matched)
            .await?;
        Ok(matched)
    }
}
