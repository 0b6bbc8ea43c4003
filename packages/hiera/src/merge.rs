//! Deep Merge
//!
//! Recursive structural combination of configuration documents across
//! priorities:
//!
//! - map / map: recursive key-wise merge
//! - list / list: concatenation (later values appended)
//! - anything else (scalars, type mismatch): the later value replaces
//!
//! Set semantics for `uniqueItems` arrays come from re-validating the
//! merged document through the key's model, which collapses duplicates.

use serde_json::{Map, Value};

/// Merge `update` into `target`, with `update` taking precedence
///
/// Non-object updates leave `target` untouched; callers validate that
/// every contributing document is a map before merging.
pub fn merge_into(update: &Value, target: &mut Map<String, Value>) {
    let Some(fields) = update.as_object() else {
        return;
    };
    for (name, value) in fields {
        match target.get_mut(name) {
            Some(Value::Object(existing)) if value.is_object() => {
                merge_into(value, existing);
            }
            Some(Value::Array(existing)) if value.is_array() => {
                if let Some(items) = value.as_array() {
                    existing.extend(items.iter().cloned());
                }
            }
            _ => {
                target.insert(name.clone(), value.clone());
            }
        }
    }
}

/// Merge documents given in precedence order (highest precedence first)
///
/// Folds from the back so that low-precedence values land first and each
/// higher-precedence document overrides on top.
pub fn merge_ordered<'a, I>(documents: I) -> Value
where
    I: IntoIterator<Item = &'a Value>,
    I::IntoIter: DoubleEndedIterator,
{
    let mut merged = Map::new();
    for document in documents.into_iter().rev() {
        merge_into(document, &mut merged);
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_document_is_identity() {
        let doc = json!({"a": 1, "b": {"c": [1, 2]}});
        assert_eq!(merge_ordered([&doc]), doc);
    }

    #[test]
    fn test_scalar_higher_precedence_wins() {
        let high = json!({"a": "y"});
        let low = json!({"a": "x", "b": 1});
        assert_eq!(merge_ordered([&high, &low]), json!({"a": "y", "b": 1}));
    }

    #[test]
    fn test_nested_maps_merge_and_lists_concatenate() {
        let high = json!({"a": "y", "b": {"blub": ["c"], "extra": true}});
        let low = json!({"a": "x", "b": {"blub": ["a", "b"]}});
        assert_eq!(
            merge_ordered([&high, &low]),
            json!({"a": "y", "b": {"blub": ["a", "b", "c"], "extra": true}})
        );
    }

    #[test]
    fn test_type_mismatch_replaced_by_higher_precedence() {
        let high = json!({"a": {"nested": 1}});
        let low = json!({"a": "scalar"});
        assert_eq!(merge_ordered([&high, &low]), json!({"a": {"nested": 1}}));

        let high = json!({"a": "scalar"});
        let low = json!({"a": [1, 2]});
        assert_eq!(merge_ordered([&high, &low]), json!({"a": "scalar"}));
    }

    #[test]
    fn test_disjoint_maps_commute() {
        let left = json!({"a": 1});
        let right = json!({"b": 2});
        assert_eq!(
            merge_ordered([&left, &right]),
            merge_ordered([&right, &left])
        );
    }

    #[test]
    fn test_three_way_priority_chain() {
        let first = json!({"v": 1});
        let second = json!({"v": 2, "w": 2});
        let third = json!({"v": 3, "w": 3, "x": 3});
        assert_eq!(
            merge_ordered([&first, &second, &third]),
            json!({"v": 1, "w": 2, "x": 3})
        );
    }
}
