//! Lookup Cache Records
//!
//! Cache entries are content-addressed by `(key_id, merge, facts)`. Facts
//! are stored as an array of `{key, value}` pairs sorted by key, so
//! equality of fact maps translates to equality of the serialised record.
//! Exact equality of the sorted array drives `get`; pairwise subset
//! matching is only ever used for invalidation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stratum_hiera::Facts;

/// One fact as stored inside a cache entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FactPair {
    pub key: String,
    pub value: String,
}

/// A memoised lookup result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookupCacheEntry {
    pub key_id: String,
    pub merge: bool,
    /// Sorted by `key`
    pub facts: Vec<FactPair>,
    pub result: Value,
}

/// Canonical (sorted) pair form of a fact map
pub fn canonical_facts(facts: &Facts) -> Vec<FactPair> {
    // BTreeMap iteration is already key-ordered
    facts
        .iter()
        .map(|(key, value)| FactPair {
            key: key.clone(),
            value: value.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_facts_sorted() {
        let mut facts = Facts::new();
        facts.insert("zone".to_string(), "b".to_string());
        facts.insert("env".to_string(), "prod".to_string());

        let pairs = canonical_facts(&facts);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].key, "env");
        assert_eq!(pairs[1].key, "zone");
    }
}
