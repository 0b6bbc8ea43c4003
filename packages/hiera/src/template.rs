//! Level Template Resolver
//!
//! Level ids may embed `{fact}` placeholders (e.g. `stage/{stage}.yaml`).
//! This module parses placeholder names, expands a template against a fact
//! map and normalises fact maps down to the placeholders a template
//! actually uses. All functions are pure.
//!
//! Placeholder names match `[A-Za-z_][A-Za-z0-9_]*`; there is no escaping
//! mechanism. Text outside well-formed placeholders passes through
//! untouched.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::HieraError;

/// A fact map: named string attributes of the requesting context
///
/// Ordered so iteration yields a canonical (sorted) sequence.
pub type Facts = BTreeMap<String, String>;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));

/// Placeholder names in order of appearance (duplicates preserved)
pub fn placeholders(level_id: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(level_id)
        .map(|captures| captures[1].to_string())
        .collect()
}

/// The set of distinct placeholder names in a level id
pub fn placeholder_set(level_id: &str) -> BTreeSet<String> {
    placeholders(level_id).into_iter().collect()
}

/// Substitute every placeholder from `facts`
///
/// Returns [`HieraError::MissingFact`] naming the first placeholder that
/// has no value. A template without placeholders expands to itself.
pub fn expand(level_id: &str, facts: &Facts) -> Result<String, HieraError> {
    let mut missing: Option<String> = None;
    let expanded = PLACEHOLDER.replace_all(level_id, |captures: &Captures<'_>| {
        let name = &captures[1];
        match facts.get(name) {
            Some(value) => value.clone(),
            None => {
                if missing.is_none() {
                    missing = Some(name.to_string());
                }
                String::new()
            }
        }
    });
    match missing {
        Some(fact) => Err(HieraError::missing_fact(level_id, fact)),
        None => Ok(expanded.into_owned()),
    }
}

/// Drop facts that are not placeholders of the level id
///
/// The returned map contains exactly the facts a stored level-data row is
/// allowed to carry for this template.
pub fn normalize_facts(level_id: &str, facts: &Facts) -> Facts {
    let wanted = placeholder_set(level_id);
    facts
        .iter()
        .filter(|(name, _)| wanted.contains(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(pairs: &[(&str, &str)]) -> Facts {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_placeholders_in_order() {
        assert_eq!(
            placeholders("nodes/{env}/{role}.yaml"),
            vec!["env".to_string(), "role".to_string()]
        );
        assert!(placeholders("common").is_empty());
    }

    #[test]
    fn test_placeholders_duplicates_and_set() {
        assert_eq!(placeholders("{a}/{b}/{a}"), vec!["a", "b", "a"]);
        let set = placeholder_set("{a}/{b}/{a}");
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_expand() {
        let facts = facts(&[("env", "prod"), ("role", "db")]);
        assert_eq!(
            expand("nodes/{env}/{role}.yaml", &facts).unwrap(),
            "nodes/prod/db.yaml"
        );
        // No placeholders: identity
        assert_eq!(expand("common", &facts).unwrap(), "common");
    }

    #[test]
    fn test_expand_missing_fact() {
        let err = expand("{env}/{stage}", &facts(&[("env", "prod")])).unwrap_err();
        assert_eq!(
            err,
            HieraError::MissingFact {
                level_id: "{env}/{stage}".to_string(),
                fact: "stage".to_string()
            }
        );
    }

    #[test]
    fn test_expand_ignores_malformed_braces() {
        // Stray braces and invalid names are not placeholders
        let facts = facts(&[("env", "prod")]);
        assert_eq!(expand("a{1bad}/{env}", &facts).unwrap(), "a{1bad}/prod");
        assert_eq!(expand("{ env }", &facts).unwrap(), "{ env }");
    }

    #[test]
    fn test_normalize_facts() {
        let input = facts(&[("env", "prod"), ("extra", "x"), ("role", "db")]);
        let normalised = normalize_facts("{env}.yaml", &input);
        assert_eq!(normalised, facts(&[("env", "prod")]));

        // Template without placeholders keeps nothing
        assert!(normalize_facts("common", &input).is_empty());
    }
}
