//! HieraStore Trait - Database Abstraction Layer
//!
//! This trait abstracts the catalogue collections the engine depends on,
//! enabling multiple backends (SurrealDB, in-memory) without changing the
//! services. All methods are async; implementations must be `Send + Sync`.
//!
//! # Method Categories
//!
//! - **Key models**: persisted dynamic models (built-ins never persist)
//! - **Keys**: user-facing configuration names
//! - **Levels**: lookup scopes; `id` and `priority` unique
//! - **Level data**: composite-keyed values; the priority-ordered
//!   `search_level_data_by_key` is the primary lookup-path query
//! - **Lookup cache**: content-addressed memoisation with subset
//!   invalidation
//! - **Node groups**: filter definitions plus maintained membership
//!
//! # Change feed
//!
//! The four `watch_*` methods return broadcast receivers carrying
//! `{op, document_key, full_document?}` events for every committed
//! mutation. A fresh subscriber sees only events after subscription;
//! consumers load a snapshot first and treat the feed as idempotent
//! updates.
//!
//! # Concurrency
//!
//! Uniqueness is enforced by the backend: two concurrent creates of the
//! same id (or the same level-data composite key) see exactly one
//! success. Reads reflect the store state at the moment of the read; no
//! cross-operation locks are held.

use async_trait::async_trait;
use serde_json::Value;
use stratum_hiera::Facts;
use tokio::sync::broadcast;

use crate::db::error::DatabaseError;
use crate::db::events::ChangeEvent;
use crate::models::{
    KeyModelRecord, KeyPatch, KeyQuery, KeyRecord, LevelDataId, LevelDataQuery, LevelDataRecord,
    LevelPatch, LevelRecord, NodeGroup, NodeGroupPatch,
};

/// Abstraction over the catalogue document store
#[async_trait]
pub trait HieraStore: Send + Sync {
    //
    // KEY MODELS (dynamic)
    //

    /// Persist a dynamic key model; fails with `Duplicate` when the id exists
    async fn create_key_model(
        &self,
        record: KeyModelRecord,
    ) -> Result<KeyModelRecord, DatabaseError>;

    async fn get_key_model(&self, id: &str) -> Result<Option<KeyModelRecord>, DatabaseError>;

    /// Returns whether the model existed
    async fn delete_key_model(&self, id: &str) -> Result<bool, DatabaseError>;

    async fn list_key_models(&self) -> Result<Vec<KeyModelRecord>, DatabaseError>;

    fn watch_key_models(&self) -> broadcast::Receiver<ChangeEvent<KeyModelRecord>>;

    //
    // KEYS
    //

    async fn create_key(&self, record: KeyRecord) -> Result<KeyRecord, DatabaseError>;

    async fn get_key(&self, id: &str) -> Result<Option<KeyRecord>, DatabaseError>;

    /// Sparse update; returns `None` when the key does not exist
    async fn update_key(&self, id: &str, patch: KeyPatch)
        -> Result<Option<KeyRecord>, DatabaseError>;

    async fn delete_key(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Keys matching the query, sorted by id
    async fn list_keys(&self, query: KeyQuery) -> Result<Vec<KeyRecord>, DatabaseError>;

    /// How many keys reference this key model
    async fn count_keys_referencing(&self, key_model_id: &str) -> Result<u64, DatabaseError>;

    fn watch_keys(&self) -> broadcast::Receiver<ChangeEvent<KeyRecord>>;

    //
    // LEVELS
    //

    /// Fails with `Duplicate` on an existing id or a taken priority
    async fn create_level(&self, record: LevelRecord) -> Result<LevelRecord, DatabaseError>;

    async fn get_level(&self, id: &str) -> Result<Option<LevelRecord>, DatabaseError>;

    /// Sparse update; a priority collision fails with `Duplicate`
    async fn update_level(
        &self,
        id: &str,
        patch: LevelPatch,
    ) -> Result<Option<LevelRecord>, DatabaseError>;

    async fn delete_level(&self, id: &str) -> Result<bool, DatabaseError>;

    /// All levels sorted ascending by priority
    async fn list_levels(&self) -> Result<Vec<LevelRecord>, DatabaseError>;

    fn watch_levels(&self) -> broadcast::Receiver<ChangeEvent<LevelRecord>>;

    //
    // LEVEL DATA
    //

    /// Fails with `Duplicate` on a composite-key collision
    async fn create_level_data(
        &self,
        record: LevelDataRecord,
    ) -> Result<LevelDataRecord, DatabaseError>;

    async fn get_level_data(
        &self,
        id: &LevelDataId,
    ) -> Result<Option<LevelDataRecord>, DatabaseError>;

    /// Replace the stored value; returns `None` when the row does not exist
    async fn update_level_data(
        &self,
        id: &LevelDataId,
        data: Value,
    ) -> Result<Option<LevelDataRecord>, DatabaseError>;

    async fn delete_level_data(&self, id: &LevelDataId) -> Result<bool, DatabaseError>;

    /// The primary lookup-path query: rows for `key_id` whose expanded id
    /// is in `expanded_ids`, sorted ascending by priority
    async fn search_level_data_by_key(
        &self,
        key_id: &str,
        expanded_ids: &[String],
    ) -> Result<Vec<LevelDataRecord>, DatabaseError>;

    /// Admin search with filters, ordering and pagination
    async fn search_level_data(
        &self,
        query: LevelDataQuery,
    ) -> Result<Vec<LevelDataRecord>, DatabaseError>;

    /// Rewrite the denormalised priority on every row of a level;
    /// returns the number of rows touched
    async fn update_priority_by_level(
        &self,
        level_id: &str,
        priority: i64,
    ) -> Result<u64, DatabaseError>;

    async fn delete_level_data_for_level(&self, level_id: &str) -> Result<u64, DatabaseError>;

    async fn delete_level_data_for_key(&self, key_id: &str) -> Result<u64, DatabaseError>;

    //
    // LOOKUP CACHE
    //

    /// Exact-equality fetch on the canonical `(key_id, merge, sorted
    /// facts)` form
    async fn cache_get(
        &self,
        key_id: &str,
        facts: &Facts,
        merge: bool,
    ) -> Result<Option<Value>, DatabaseError>;

    /// Upsert a memoised result
    async fn cache_put(
        &self,
        key_id: &str,
        facts: &Facts,
        merge: bool,
        result: Value,
    ) -> Result<(), DatabaseError>;

    /// Delete entries for `key_id` whose stored facts are a superset of
    /// `facts`; with empty `facts`, delete every entry for the key
    async fn cache_invalidate(&self, key_id: &str, facts: &Facts) -> Result<(), DatabaseError>;

    /// Drop the whole cache (level mutations)
    async fn cache_clear(&self) -> Result<(), DatabaseError>;

    //
    // NODE GROUPS
    //

    async fn create_node_group(&self, group: NodeGroup) -> Result<NodeGroup, DatabaseError>;

    async fn get_node_group(&self, id: &str) -> Result<Option<NodeGroup>, DatabaseError>;

    async fn update_node_group(
        &self,
        id: &str,
        patch: NodeGroupPatch,
    ) -> Result<Option<NodeGroup>, DatabaseError>;

    async fn delete_node_group(&self, id: &str) -> Result<bool, DatabaseError>;

    async fn list_node_groups(&self) -> Result<Vec<NodeGroup>, DatabaseError>;

    /// Set-semantics membership rewrite after fact ingestion: add the node
    /// to every group in `matched`, remove it from every other group
    async fn rewrite_group_membership(
        &self,
        node_id: &str,
        matched: &[String],
    ) -> Result<(), DatabaseError>;

    fn watch_node_groups(&self) -> broadcast::Receiver<ChangeEvent<NodeGroup>>;
}
