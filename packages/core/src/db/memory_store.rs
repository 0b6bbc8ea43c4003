//! MemoryStore - Process-Local Backend
//!
//! Keeps every collection in plain maps behind one `RwLock`. Used by the
//! test suites and by embedders that want an engine without persistence.
//! Semantics mirror the SurrealDB backend: unique ids, unique level
//! priorities, the composite level-data key, canonical cache facts and
//! change-feed events on every committed mutation.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use stratum_hiera::Facts;
use tokio::sync::{broadcast, RwLock};

use crate::db::error::DatabaseError;
use crate::db::events::{ChangeEvent, ChangeOp, CHANGE_CHANNEL_CAPACITY};
use crate::db::store::HieraStore;
use crate::models::{
    canonical_facts, FactPair, KeyModelRecord, KeyPatch, KeyQuery, KeyRecord, LevelDataId,
    LevelDataQuery, LevelDataRecord, LevelDataSort, LevelPatch, LevelRecord, NodeGroup,
    NodeGroupPatch, SortOrder,
};

/// Cache entries keyed by `(key_id, merge, sorted facts)`
type CacheKey = (String, bool, Vec<FactPair>);

#[derive(Default)]
struct Inner {
    key_models: BTreeMap<String, KeyModelRecord>,
    keys: BTreeMap<String, KeyRecord>,
    levels: BTreeMap<String, LevelRecord>,
    /// Keyed `(key_id, expanded_id, level_id)`, matching the composite index
    level_data: BTreeMap<(String, String, String), LevelDataRecord>,
    cache: HashMap<CacheKey, Value>,
    node_groups: BTreeMap<String, NodeGroup>,
}

/// In-memory catalogue store
pub struct MemoryStore {
    inner: RwLock<Inner>,
    key_model_events: broadcast::Sender<ChangeEvent<KeyModelRecord>>,
    key_events: broadcast::Sender<ChangeEvent<KeyRecord>>,
    level_events: broadcast::Sender<ChangeEvent<LevelRecord>>,
    node_group_events: broadcast::Sender<ChangeEvent<NodeGroup>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (key_model_events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (key_events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (level_events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (node_group_events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner::default()),
            key_model_events,
            key_events,
            level_events,
            node_group_events,
        }
    }

    fn level_data_key(id: &LevelDataId) -> (String, String, String) {
        (
            id.key_id.clone(),
            id.expanded_id.clone(),
            id.level_id.clone(),
        )
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HieraStore for MemoryStore {
    //
    // KEY MODELS
    //

    async fn create_key_model(
        &self,
        record: KeyModelRecord,
    ) -> Result<KeyModelRecord, DatabaseError> {
        let mut inner = self.inner.write().await;
        if inner.key_models.contains_key(&record.id) {
            return Err(DatabaseError::duplicate("key model", &record.id));
        }
        inner.key_models.insert(record.id.clone(), record.clone());
        drop(inner);
        let _ = self
            .key_model_events
            .send(ChangeEvent::upsert(ChangeOp::Insert, record.id.clone(), record.clone()));
        Ok(record)
    }

    async fn get_key_model(&self, id: &str) -> Result<Option<KeyModelRecord>, DatabaseError> {
        Ok(self.inner.read().await.key_models.get(id).cloned())
    }

    async fn delete_key_model(&self, id: &str) -> Result<bool, DatabaseError> {
        let existed = self.inner.write().await.key_models.remove(id).is_some();
        if existed {
            let _ = self.key_model_events.send(ChangeEvent::delete(id));
        }
        Ok(existed)
    }

    async fn list_key_models(&self) -> Result<Vec<KeyModelRecord>, DatabaseError> {
        Ok(self.inner.read().await.key_models.values().cloned().collect())
    }

    fn watch_key_models(&self) -> broadcast::Receiver<ChangeEvent<KeyModelRecord>> {
        self.key_model_events.subscribe()
    }

    //
    // KEYS
    //

    async fn create_key(&self, record: KeyRecord) -> Result<KeyRecord, DatabaseError> {
        let mut inner = self.inner.write().await;
        if inner.keys.contains_key(&record.id) {
            return Err(DatabaseError::duplicate("key", &record.id));
        }
        inner.keys.insert(record.id.clone(), record.clone());
        drop(inner);
        let _ = self
            .key_events
            .send(ChangeEvent::upsert(ChangeOp::Insert, record.id.clone(), record.clone()));
        Ok(record)
    }

    async fn get_key(&self, id: &str) -> Result<Option<KeyRecord>, DatabaseError> {
        Ok(self.inner.read().await.keys.get(id).cloned())
    }

    async fn update_key(
        &self,
        id: &str,
        patch: KeyPatch,
    ) -> Result<Option<KeyRecord>, DatabaseError> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.keys.get_mut(id) else {
            return Ok(None);
        };
        if let Some(key_model_id) = patch.key_model_id {
            record.key_model_id = key_model_id;
        }
        if let Some(description) = patch.description {
            record.description = Some(description);
        }
        if let Some(deprecated) = patch.deprecated {
            record.deprecated = deprecated;
        }
        let updated = record.clone();
        drop(inner);
        let _ = self
            .key_events
            .send(ChangeEvent::upsert(ChangeOp::Update, id, updated.clone()));
        Ok(Some(updated))
    }

    async fn delete_key(&self, id: &str) -> Result<bool, DatabaseError> {
        let existed = self.inner.write().await.keys.remove(id).is_some();
        if existed {
            let _ = self.key_events.send(ChangeEvent::delete(id));
        }
        Ok(existed)
    }

    async fn list_keys(&self, query: KeyQuery) -> Result<Vec<KeyRecord>, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .keys
            .values()
            .filter(|record| {
                query
                    .key_model_id
                    .as_ref()
                    .is_none_or(|model| &record.key_model_id == model)
                    && query
                        .deprecated
                        .is_none_or(|deprecated| record.deprecated == deprecated)
            })
            .cloned()
            .collect())
    }

    async fn count_keys_referencing(&self, key_model_id: &str) -> Result<u64, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .keys
            .values()
            .filter(|record| record.key_model_id == key_model_id)
            .count() as u64)
    }

    fn watch_keys(&self) -> broadcast::Receiver<ChangeEvent<KeyRecord>> {
        self.key_events.subscribe()
    }

    //
    // LEVELS
    //

    async fn create_level(&self, record: LevelRecord) -> Result<LevelRecord, DatabaseError> {
        let mut inner = self.inner.write().await;
        if inner.levels.contains_key(&record.id) {
            return Err(DatabaseError::duplicate("level", &record.id));
        }
        if inner
            .levels
            .values()
            .any(|level| level.priority == record.priority)
        {
            return Err(DatabaseError::duplicate(
                "level priority",
                record.priority.to_string(),
            ));
        }
        inner.levels.insert(record.id.clone(), record.clone());
        drop(inner);
        let _ = self
            .level_events
            .send(ChangeEvent::upsert(ChangeOp::Insert, record.id.clone(), record.clone()));
        Ok(record)
    }

    async fn get_level(&self, id: &str) -> Result<Option<LevelRecord>, DatabaseError> {
        Ok(self.inner.read().await.levels.get(id).cloned())
    }

    async fn update_level(
        &self,
        id: &str,
        patch: LevelPatch,
    ) -> Result<Option<LevelRecord>, DatabaseError> {
        let mut inner = self.inner.write().await;
        if !inner.levels.contains_key(id) {
            return Ok(None);
        }
        if let Some(priority) = patch.priority {
            if inner
                .levels
                .values()
                .any(|level| level.id != id && level.priority == priority)
            {
                return Err(DatabaseError::duplicate(
                    "level priority",
                    priority.to_string(),
                ));
            }
        }
        let Some(record) = inner.levels.get_mut(id) else {
            return Ok(None);
        };
        if let Some(priority) = patch.priority {
            record.priority = priority;
        }
        if let Some(description) = patch.description {
            record.description = Some(description);
        }
        let updated = record.clone();
        drop(inner);
        let _ = self
            .level_events
            .send(ChangeEvent::upsert(ChangeOp::Update, id, updated.clone()));
        Ok(Some(updated))
    }

    async fn delete_level(&self, id: &str) -> Result<bool, DatabaseError> {
        let existed = self.inner.write().await.levels.remove(id).is_some();
        if existed {
            let _ = self.level_events.send(ChangeEvent::delete(id));
        }
        Ok(existed)
    }

    async fn list_levels(&self) -> Result<Vec<LevelRecord>, DatabaseError> {
        let mut levels: Vec<LevelRecord> =
            self.inner.read().await.levels.values().cloned().collect();
        levels.sort_by_key(|level| level.priority);
        Ok(levels)
    }

    fn watch_levels(&self) -> broadcast::Receiver<ChangeEvent<LevelRecord>> {
        self.level_events.subscribe()
    }

    //
    // LEVEL DATA
    //

    async fn create_level_data(
        &self,
        record: LevelDataRecord,
    ) -> Result<LevelDataRecord, DatabaseError> {
        let key = (
            record.key_id.clone(),
            record.expanded_id.clone(),
            record.level_id.clone(),
        );
        let mut inner = self.inner.write().await;
        if inner.level_data.contains_key(&key) {
            return Err(DatabaseError::duplicate(
                "level data",
                format!(
                    "{}/{}/{}",
                    record.level_id, record.expanded_id, record.key_id
                ),
            ));
        }
        inner.level_data.insert(key, record.clone());
        Ok(record)
    }

    async fn get_level_data(
        &self,
        id: &LevelDataId,
    ) -> Result<Option<LevelDataRecord>, DatabaseError> {
        Ok(self
            .inner
            .read()
            .await
            .level_data
            .get(&Self::level_data_key(id))
            .cloned())
    }

    async fn update_level_data(
        &self,
        id: &LevelDataId,
        data: Value,
    ) -> Result<Option<LevelDataRecord>, DatabaseError> {
        let mut inner = self.inner.write().await;
        let Some(record) = inner.level_data.get_mut(&Self::level_data_key(id)) else {
            return Ok(None);
        };
        record.data = data;
        Ok(Some(record.clone()))
    }

    async fn delete_level_data(&self, id: &LevelDataId) -> Result<bool, DatabaseError> {
        Ok(self
            .inner
            .write()
            .await
            .level_data
            .remove(&Self::level_data_key(id))
            .is_some())
    }

    async fn search_level_data_by_key(
        &self,
        key_id: &str,
        expanded_ids: &[String],
    ) -> Result<Vec<LevelDataRecord>, DatabaseError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<LevelDataRecord> = inner
            .level_data
            .values()
            .filter(|row| row.key_id == key_id && expanded_ids.contains(&row.expanded_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.level_id.cmp(&b.level_id))
        });
        Ok(rows)
    }

    async fn search_level_data(
        &self,
        query: LevelDataQuery,
    ) -> Result<Vec<LevelDataRecord>, DatabaseError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<LevelDataRecord> = inner
            .level_data
            .values()
            .filter(|row| {
                query.key_id.as_ref().is_none_or(|id| &row.key_id == id)
                    && query.level_id.as_ref().is_none_or(|id| &row.level_id == id)
                    && query
                        .expanded_id
                        .as_ref()
                        .is_none_or(|id| &row.expanded_id == id)
                    && query
                        .fact
                        .as_ref()
                        .is_none_or(|(name, value)| row.facts.get(name) == Some(value))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let ordering = match query.sort {
                LevelDataSort::ExpandedId => a.expanded_id.cmp(&b.expanded_id),
                LevelDataSort::LevelId => a.level_id.cmp(&b.level_id),
                LevelDataSort::KeyId => a.key_id.cmp(&b.key_id),
                LevelDataSort::Priority => a.priority.cmp(&b.priority),
            };
            match query.order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });
        if let Some(limit) = query.limit {
            rows = rows.into_iter().skip(query.page * limit).take(limit).collect();
        }
        Ok(rows)
    }

    async fn update_priority_by_level(
        &self,
        level_id: &str,
        priority: i64,
    ) -> Result<u64, DatabaseError> {
        let mut inner = self.inner.write().await;
        let mut touched = 0;
        for record in inner.level_data.values_mut() {
            if record.level_id == level_id {
                record.priority = priority;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn delete_level_data_for_level(&self, level_id: &str) -> Result<u64, DatabaseError> {
        let mut inner = self.inner.write().await;
        let before = inner.level_data.len();
        inner.level_data.retain(|_, record| record.level_id != level_id);
        Ok((before - inner.level_data.len()) as u64)
    }

    async fn delete_level_data_for_key(&self, key_id: &str) -> Result<u64, DatabaseError> {
        let mut inner = self.inner.write().await;
        let before = inner.level_data.len();
        inner.level_data.retain(|_, record| record.key_id != key_id);
        Ok((before - inner.level_data.len()) as u64)
    }

    //
    // LOOKUP CACHE
    //

    async fn cache_get(
        &self,
        key_id: &str,
        facts: &Facts,
        merge: bool,
    ) -> Result<Option<Value>, DatabaseError> {
        let key = (key_id.to_string(), merge, canonical_facts(facts));
        Ok(self.inner.read().await.cache.get(&key).cloned())
    }

    async fn cache_put(
        &self,
        key_id: &str,
        facts: &Facts,
        merge: bool,
        result: Value,
    ) -> Result<(), DatabaseError> {
        let key = (key_id.to_string(), merge, canonical_facts(facts));
        self.inner.write().await.cache.insert(key, result);
        Ok(())
    }

    async fn cache_invalidate(&self, key_id: &str, facts: &Facts) -> Result<(), DatabaseError> {
        let subset = canonical_facts(facts);
        let mut inner = self.inner.write().await;
        inner.cache.retain(|(cached_key, _, cached_facts), _| {
            if cached_key != key_id {
                return true;
            }
            // Empty subset clears every entry for the key; otherwise keep
            // only entries whose facts are NOT a superset of the subset
            !subset.iter().all(|pair| cached_facts.contains(pair))
        });
        Ok(())
    }

    async fn cache_clear(&self) -> Result<(), DatabaseError> {
        self.inner.write().await.cache.clear();
        Ok(())
    }

    //
    // NODE GROUPS
    //

    async fn create_node_group(&self, group: NodeGroup) -> Result<NodeGroup, DatabaseError> {
        let mut inner = self.inner.write().await;
        if inner.node_groups.contains_key(&group.id) {
            return Err(DatabaseError::duplicate("node group", &group.id));
        }
        inner.node_groups.insert(group.id.clone(), group.clone());
        drop(inner);
        let _ = self
            .node_group_events
            .send(ChangeEvent::upsert(ChangeOp::Insert, group.id.clone(), group.clone()));
        Ok(group)
    }

    async fn get_node_group(&self, id: &str) -> Result<Option<NodeGroup>, DatabaseError> {
        Ok(self.inner.read().await.node_groups.get(id).cloned())
    }

    async fn update_node_group(
        &self,
        id: &str,
        patch: NodeGroupPatch,
    ) -> Result<Option<NodeGroup>, DatabaseError> {
        let mut inner = self.inner.write().await;
        let Some(group) = inner.node_groups.get_mut(id) else {
            return Ok(None);
        };
        if let Some(filters) = patch.filters {
            group.filters = filters;
        }
        if let Some(teams) = patch.teams {
            group.teams = teams;
        }
        let updated = group.clone();
        drop(inner);
        let _ = self
            .node_group_events
            .send(ChangeEvent::upsert(ChangeOp::Update, id, updated.clone()));
        Ok(Some(updated))
    }

    async fn delete_node_group(&self, id: &str) -> Result<bool, DatabaseError> {
        let existed = self.inner.write().await.node_groups.remove(id).is_some();
        if existed {
            let _ = self.node_group_events.send(ChangeEvent::delete(id));
        }
        Ok(existed)
    }

    async fn list_node_groups(&self) -> Result<Vec<NodeGroup>, DatabaseError> {
        Ok(self.inner.read().await.node_groups.values().cloned().collect())
    }

    async fn rewrite_group_membership(
        &self,
        node_id: &str,
        matched: &[String],
    ) -> Result<(), DatabaseError> {
        let mut inner = self.inner.write().await;
        let mut changed = Vec::new();
        for group in inner.node_groups.values_mut() {
            let is_member = group.nodes.iter().any(|node| node == node_id);
            if matched.contains(&group.id) {
                if !is_member {
                    group.nodes.push(node_id.to_string());
                    changed.push(group.clone());
                }
            } else if is_member {
                group.nodes.retain(|node| node != node_id);
                changed.push(group.clone());
            }
        }
        drop(inner);
        for group in changed {
            let _ = self
                .node_group_events
                .send(ChangeEvent::upsert(ChangeOp::Update, group.id.clone(), group));
        }
        Ok(())
    }

    fn watch_node_groups(&self) -> broadcast::Receiver<ChangeEvent<NodeGroup>> {
        self.node_group_events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts(pairs: &[(&str, &str)]) -> Facts {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn row(level_id: &str, expanded_id: &str, key_id: &str, priority: i64) -> LevelDataRecord {
        LevelDataRecord {
            level_id: level_id.to_string(),
            expanded_id: expanded_id.to_string(),
            key_id: key_id.to_string(),
            facts: Facts::new(),
            data: json!("v"),
            priority,
        }
    }

    #[tokio::test]
    async fn test_level_priority_unique() {
        let store = MemoryStore::new();
        store
            .create_level(LevelRecord {
                id: "common".to_string(),
                priority: 100,
                description: None,
            })
            .await
            .unwrap();

        let err = store
            .create_level(LevelRecord {
                id: "other".to_string(),
                priority: 100,
                description: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { .. }));

        // Updating onto a taken priority also conflicts
        store
            .create_level(LevelRecord {
                id: "other".to_string(),
                priority: 50,
                description: None,
            })
            .await
            .unwrap();
        let err = store
            .update_level(
                "other",
                LevelPatch {
                    priority: Some(100),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_level_data_composite_key() {
        let store = MemoryStore::new();
        store
            .create_level_data(row("{env}", "prod", "k", 50))
            .await
            .unwrap();
        // Same composite id collides
        let err = store
            .create_level_data(row("{env}", "prod", "k", 50))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { .. }));
        // A different expansion of the same level does not
        store
            .create_level_data(row("{env}", "stage", "k", 50))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_search_by_key_sorted_by_priority() {
        let store = MemoryStore::new();
        store.create_level_data(row("common", "common", "k", 100)).await.unwrap();
        store.create_level_data(row("{env}", "prod", "k", 50)).await.unwrap();
        store.create_level_data(row("{env}", "prod", "other", 50)).await.unwrap();

        let rows = store
            .search_level_data_by_key("k", &["common".to_string(), "prod".to_string()])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].expanded_id, "prod");
        assert_eq!(rows[1].expanded_id, "common");
    }

    #[tokio::test]
    async fn test_cache_exact_get_and_subset_invalidate() {
        let store = MemoryStore::new();
        let prod = facts(&[("env", "prod")]);
        let prod_web = facts(&[("env", "prod"), ("role", "web")]);

        store.cache_put("k", &prod, false, json!(1)).await.unwrap();
        store.cache_put("k", &prod_web, false, json!(2)).await.unwrap();

        // Exact equality: a subset of a stored fact map is not a hit
        assert_eq!(store.cache_get("k", &prod, false).await.unwrap(), Some(json!(1)));
        assert_eq!(
            store.cache_get("k", &facts(&[("role", "web")]), false).await.unwrap(),
            None
        );

        // Subset invalidation drops every superset entry
        store.cache_invalidate("k", &prod).await.unwrap();
        assert_eq!(store.cache_get("k", &prod, false).await.unwrap(), None);
        assert_eq!(store.cache_get("k", &prod_web, false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_cache_invalidate_empty_facts_clears_key() {
        let store = MemoryStore::new();
        store.cache_put("k", &facts(&[("a", "1")]), false, json!(1)).await.unwrap();
        store.cache_put("k", &Facts::new(), true, json!(2)).await.unwrap();
        store.cache_put("other", &Facts::new(), false, json!(3)).await.unwrap();

        store.cache_invalidate("k", &Facts::new()).await.unwrap();
        assert_eq!(store.cache_get("k", &facts(&[("a", "1")]), false).await.unwrap(), None);
        assert_eq!(store.cache_get("k", &Facts::new(), true).await.unwrap(), None);
        // Other keys untouched
        assert_eq!(
            store.cache_get("other", &Facts::new(), false).await.unwrap(),
            Some(json!(3))
        );
    }

    #[tokio::test]
    async fn test_membership_rewrite_is_set_semantics() {
        let store = MemoryStore::new();
        for id in ["a", "b"] {
            store
                .create_node_group(NodeGroup {
                    id: id.to_string(),
                    filters: Vec::new(),
                    nodes: Vec::new(),
                    teams: Vec::new(),
                })
                .await
                .unwrap();
        }

        store
            .rewrite_group_membership("node1", &["a".to_string()])
            .await
            .unwrap();
        // Idempotent: a second rewrite does not duplicate the member
        store
            .rewrite_group_membership("node1", &["a".to_string()])
            .await
            .unwrap();
        let group = store.get_node_group("a").await.unwrap().unwrap();
        assert_eq!(group.nodes, vec!["node1".to_string()]);

        // Moving to b removes from a
        store
            .rewrite_group_membership("node1", &["b".to_string()])
            .await
            .unwrap();
        assert!(store.get_node_group("a").await.unwrap().unwrap().nodes.is_empty());
        assert_eq!(
            store.get_node_group("b").await.unwrap().unwrap().nodes,
            vec!["node1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_change_events_emitted() {
        let store = MemoryStore::new();
        let mut rx = store.watch_levels();
        store
            .create_level(LevelRecord {
                id: "common".to_string(),
                priority: 100,
                description: None,
            })
            .await
            .unwrap();
        store.delete_level("common").await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.op, ChangeOp::Insert);
        assert_eq!(event.document_key, "common");
        assert!(event.full_document.is_some());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.op, ChangeOp::Delete);
        assert!(event.full_document.is_none());
    }
}
