//! SurrealStore - SurrealDB Backend
//!
//! The production catalogue store. Runs embedded (RocksDB for durable
//! deployments, the in-memory engine for throwaway instances) or against a
//! remote SurrealDB server over HTTP - the same API either way.
//!
//! # Design
//!
//! - Catalogue collections (`key_model`, `key`, `level`, `node_group`) use
//!   the domain id as record id via `type::thing(...)`, so id uniqueness is
//!   the database's concern
//! - `level_data` rows carry random record ids; the composite
//!   `(key_id, expanded_id, level_id)` identity is a unique index
//! - Every statement binds its parameters; no values are spliced into
//!   query text
//! - Committed mutations push change-feed events over broadcast channels,
//!   which is how the synchroniser observes this store
//!
//! # Examples
//!
//! ```rust,no_run
//! use stratum_core::db::{HieraStore, SurrealStore};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SurrealStore::new(PathBuf::from("./data/stratum.db")).await?;
//!     let levels = store.list_levels().await?;
//!     println!("{} levels configured", levels.len());
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stratum_hiera::Facts;
use surrealdb::engine::local::{Db, Mem, RocksDb};
use surrealdb::engine::remote::http::{Client, Http};
use surrealdb::opt::auth::Root;
use surrealdb::sql::{Id, Thing};
use surrealdb::Surreal;
use tokio::sync::broadcast;
use tracing::info;

use crate::db::error::DatabaseError;
use crate::db::events::{ChangeEvent, ChangeOp, CHANGE_CHANNEL_CAPACITY};
use crate::db::store::HieraStore;
use crate::models::{
    canonical_facts, FactPair, KeyModelRecord, KeyPatch, KeyQuery, KeyRecord, LevelDataId,
    LevelDataQuery, LevelDataRecord, LevelPatch, LevelRecord, LookupCacheEntry, NodeGroup,
    NodeGroupPatch, SortOrder,
};

/// SurrealDB-backed catalogue store, generic over the connection engine
pub struct SurrealStore<C: surrealdb::Connection> {
    db: Arc<Surreal<C>>,
    key_model_events: broadcast::Sender<ChangeEvent<KeyModelRecord>>,
    key_events: broadcast::Sender<ChangeEvent<KeyRecord>>,
    level_events: broadcast::Sender<ChangeEvent<LevelRecord>>,
    node_group_events: broadcast::Sender<ChangeEvent<NodeGroup>>,
}

/// Type alias for the embedded store (RocksDB or in-memory engine)
pub type EmbeddedStore = SurrealStore<Db>;

/// Type alias for the HTTP client store
pub type HttpStore = SurrealStore<Client>;

/// Internal row with the SurrealDB record id attached
#[derive(Debug, Serialize, Deserialize)]
struct KeyModelRow {
    id: Thing,
    #[serde(default)]
    description: Option<String>,
    schema: Value,
}

impl From<KeyModelRow> for KeyModelRecord {
    fn from(row: KeyModelRow) -> Self {
        Self {
            id: thing_id(&row.id),
            description: row.description,
            schema: row.schema,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyRow {
    id: Thing,
    key_model_id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    deprecated: bool,
}

impl From<KeyRow> for KeyRecord {
    fn from(row: KeyRow) -> Self {
        Self {
            id: thing_id(&row.id),
            key_model_id: row.key_model_id,
            description: row.description,
            deprecated: row.deprecated,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LevelRow {
    id: Thing,
    priority: i64,
    #[serde(default)]
    description: Option<String>,
}

impl From<LevelRow> for LevelRecord {
    fn from(row: LevelRow) -> Self {
        Self {
            id: thing_id(&row.id),
            priority: row.priority,
            description: row.description,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LevelDataRow {
    #[allow(dead_code)]
    id: Thing,
    level_id: String,
    expanded_id: String,
    key_id: String,
    #[serde(default)]
    facts: Facts,
    data: Value,
    priority: i64,
}

impl From<LevelDataRow> for LevelDataRecord {
    fn from(row: LevelDataRow) -> Self {
        Self {
            level_id: row.level_id,
            expanded_id: row.expanded_id,
            key_id: row.key_id,
            facts: row.facts,
            data: row.data,
            priority: row.priority,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeGroupRow {
    id: Thing,
    #[serde(default)]
    filters: Vec<crate::models::FilterRule>,
    #[serde(default)]
    nodes: Vec<String>,
    #[serde(default)]
    teams: Vec<String>,
}

impl From<NodeGroupRow> for NodeGroup {
    fn from(row: NodeGroupRow) -> Self {
        Self {
            id: thing_id(&row.id),
            filters: row.filters,
            nodes: row.nodes,
            teams: row.teams,
        }
    }
}

/// Extract the domain id from a SurrealDB record id
fn thing_id(thing: &Thing) -> String {
    match &thing.id {
        Id::String(id) => id.clone(),
        other => other.to_string(),
    }
}

/// Map a write error, separating unique-index and record-id conflicts
fn map_write_err(resource: &'static str, id: &str, err: surrealdb::Error) -> DatabaseError {
    let message = err.to_string();
    if message.contains("already exists") || message.contains("already contains") {
        DatabaseError::duplicate(resource, id)
    } else {
        DatabaseError::query_failed(format!("{resource} write failed: {message}"))
    }
}

/// Map a read/query error
fn map_query_err(context: &'static str, err: surrealdb::Error) -> DatabaseError {
    DatabaseError::query_failed(format!("{context}: {err}"))
}

impl SurrealStore<Db> {
    /// Open an embedded store backed by RocksDB at `db_path`
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        let db = Surreal::new::<RocksDb>(db_path.clone()).await.map_err(|err| {
            DatabaseError::unavailable(format!("opening {}: {err}", db_path.display()))
        })?;
        Self::finish_init(db).await
    }

    /// Open an embedded store on the in-memory engine (nothing persists)
    pub async fn new_in_memory() -> Result<Self, DatabaseError> {
        let db = Surreal::new::<Mem>(())
            .await
            .map_err(|err| DatabaseError::unavailable(format!("opening in-memory engine: {err}")))?;
        Self::finish_init(db).await
    }
}

impl SurrealStore<Client> {
    /// Connect to a remote SurrealDB server over HTTP
    pub async fn new_http(
        endpoint: &str,
        namespace: &str,
        database: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, DatabaseError> {
        info!(endpoint, "connecting to SurrealDB server");
        let db = Surreal::new::<Http>(endpoint)
            .await
            .map_err(|err| DatabaseError::unavailable(format!("connecting to {endpoint}: {err}")))?;
        db.signin(Root { username, password })
            .await
            .map_err(|err| DatabaseError::unavailable(format!("authenticating: {err}")))?;
        db.use_ns(namespace)
            .use_db(database)
            .await
            .map_err(|err| DatabaseError::unavailable(format!("selecting {namespace}/{database}: {err}")))?;
        Self::attach(db).await
    }
}

impl<C> SurrealStore<C>
where
    C: surrealdb::Connection,
{
    async fn finish_init(db: Surreal<C>) -> Result<Self, DatabaseError> {
        db.use_ns("stratum")
            .use_db("stratum")
            .await
            .map_err(|err| DatabaseError::unavailable(format!("selecting namespace: {err}")))?;
        Self::attach(db).await
    }

    async fn attach(db: Surreal<C>) -> Result<Self, DatabaseError> {
        let db = Arc::new(db);
        Self::initialize_schema(&db).await?;

        let (key_model_events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (key_events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (level_events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let (node_group_events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        Ok(Self {
            db,
            key_model_events,
            key_events,
            level_events,
            node_group_events,
        })
    }

    /// Create tables and indexes from the embedded schema (idempotent)
    async fn initialize_schema(db: &Arc<Surreal<C>>) -> Result<(), DatabaseError> {
        info!("creating catalogue tables and indices");
        let schema_sql = include_str!("schema.surql");
        db.query(schema_sql)
            .await
            .map_err(|err| DatabaseError::unavailable(format!("initialising schema: {err}")))?;
        info!("creating catalogue tables and indices, done");
        Ok(())
    }

    /// The underlying database handle
    pub fn db(&self) -> &Arc<Surreal<C>> {
        &self.db
    }
}

#[async_trait]
impl<C> HieraStore for SurrealStore<C>
where
    C: surrealdb::Connection,
{
    //
    // KEY MODELS
    //

    async fn create_key_model(
        &self,
        record: KeyModelRecord,
    ) -> Result<KeyModelRecord, DatabaseError> {
        let mut response = self
            .db
            .query("CREATE type::thing('key_model', $id) CONTENT { description: $description, schema: $schema };")
            .bind(("id", record.id.clone()))
            .bind(("description", record.description.clone()))
            .bind(("schema", record.schema.clone()))
            .await
            .map_err(|err| map_write_err("key model", &record.id, err))?;
        let rows: Vec<KeyModelRow> = response
            .take(0)
            .map_err(|err| map_write_err("key model", &record.id, err))?;
        let stored = rows
            .into_iter()
            .next()
            .map(KeyModelRecord::from)
            .ok_or_else(|| DatabaseError::query_failed("key model create returned no record"))?;
        let _ = self
            .key_model_events
            .send(ChangeEvent::upsert(ChangeOp::Insert, stored.id.clone(), stored.clone()));
        Ok(stored)
    }

    async fn get_key_model(&self, id: &str) -> Result<Option<KeyModelRecord>, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::thing('key_model', $id);")
            .bind(("id", id.to_string()))
            .await
            .map_err(|err| map_query_err("key model get", err))?;
        let rows: Vec<KeyModelRow> = response
            .take(0)
            .map_err(|err| map_query_err("key model get", err))?;
        Ok(rows.into_iter().next().map(KeyModelRecord::from))
    }

    async fn delete_key_model(&self, id: &str) -> Result<bool, DatabaseError> {
        let existed = self.get_key_model(id).await?.is_some();
        if !existed {
            return Ok(false);
        }
        self.db
            .query("DELETE type::thing('key_model', $id);")
            .bind(("id", id.to_string()))
            .await
            .map_err(|err| map_query_err("key model delete", err))?;
        let _ = self.key_model_events.send(ChangeEvent::delete(id));
        Ok(true)
    }

    async fn list_key_models(&self) -> Result<Vec<KeyModelRecord>, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM key_model ORDER BY id ASC;")
            .await
            .map_err(|err| map_query_err("key model list", err))?;
        let rows: Vec<KeyModelRow> = response
            .take(0)
            .map_err(|err| map_query_err("key model list", err))?;
        Ok(rows.into_iter().map(KeyModelRecord::from).collect())
    }

    fn watch_key_models(&self) -> broadcast::Receiver<ChangeEvent<KeyModelRecord>> {
        self.key_model_events.subscribe()
    }

    //
    // KEYS
    //

    async fn create_key(&self, record: KeyRecord) -> Result<KeyRecord, DatabaseError> {
        let mut response = self
            .db
            .query("CREATE type::thing('key', $id) CONTENT { key_model_id: $key_model_id, description: $description, deprecated: $deprecated };")
            .bind(("id", record.id.clone()))
            .bind(("key_model_id", record.key_model_id.clone()))
            .bind(("description", record.description.clone()))
            .bind(("deprecated", record.deprecated))
            .await
            .map_err(|err| map_write_err("key", &record.id, err))?;
        let rows: Vec<KeyRow> = response
            .take(0)
            .map_err(|err| map_write_err("key", &record.id, err))?;
        let stored = rows
            .into_iter()
            .next()
            .map(KeyRecord::from)
            .ok_or_else(|| DatabaseError::query_failed("key create returned no record"))?;
        let _ = self
            .key_events
            .send(ChangeEvent::upsert(ChangeOp::Insert, stored.id.clone(), stored.clone()));
        Ok(stored)
    }

    async fn get_key(&self, id: &str) -> Result<Option<KeyRecord>, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::thing('key', $id);")
            .bind(("id", id.to_string()))
            .await
            .map_err(|err| map_query_err("key get", err))?;
        let rows: Vec<KeyRow> = response
            .take(0)
            .map_err(|err| map_query_err("key get", err))?;
        Ok(rows.into_iter().next().map(KeyRecord::from))
    }

    async fn update_key(
        &self,
        id: &str,
        patch: KeyPatch,
    ) -> Result<Option<KeyRecord>, DatabaseError> {
        let mut patch_doc = serde_json::Map::new();
        if let Some(key_model_id) = patch.key_model_id {
            patch_doc.insert("key_model_id".to_string(), Value::String(key_model_id));
        }
        if let Some(description) = patch.description {
            patch_doc.insert("description".to_string(), Value::String(description));
        }
        if let Some(deprecated) = patch.deprecated {
            patch_doc.insert("deprecated".to_string(), Value::Bool(deprecated));
        }

        let mut response = self
            .db
            .query("UPDATE type::thing('key', $id) MERGE $patch RETURN AFTER;")
            .bind(("id", id.to_string()))
            .bind(("patch", Value::Object(patch_doc)))
            .await
            .map_err(|err| map_write_err("key", id, err))?;
        let rows: Vec<KeyRow> = response
            .take(0)
            .map_err(|err| map_write_err("key", id, err))?;
        let updated = rows.into_iter().next().map(KeyRecord::from);
        if let Some(record) = &updated {
            let _ = self
                .key_events
                .send(ChangeEvent::upsert(ChangeOp::Update, id, record.clone()));
        }
        Ok(updated)
    }

    async fn delete_key(&self, id: &str) -> Result<bool, DatabaseError> {
        let existed = self.get_key(id).await?.is_some();
        if !existed {
            return Ok(false);
        }
        self.db
            .query("DELETE type::thing('key', $id);")
            .bind(("id", id.to_string()))
            .await
            .map_err(|err| map_query_err("key delete", err))?;
        let _ = self.key_events.send(ChangeEvent::delete(id));
        Ok(true)
    }

    async fn list_keys(&self, query: KeyQuery) -> Result<Vec<KeyRecord>, DatabaseError> {
        let mut conditions = Vec::new();
        if query.key_model_id.is_some() {
            conditions.push("key_model_id = $key_model_id");
        }
        if query.deprecated.is_some() {
            conditions.push("deprecated = $deprecated");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let statement = format!("SELECT * FROM key{where_clause} ORDER BY id ASC;");

        let mut prepared = self.db.query(statement);
        if let Some(key_model_id) = query.key_model_id {
            prepared = prepared.bind(("key_model_id", key_model_id));
        }
        if let Some(deprecated) = query.deprecated {
            prepared = prepared.bind(("deprecated", deprecated));
        }
        let mut response = prepared
            .await
            .map_err(|err| map_query_err("key list", err))?;
        let rows: Vec<KeyRow> = response
            .take(0)
            .map_err(|err| map_query_err("key list", err))?;
        Ok(rows.into_iter().map(KeyRecord::from).collect())
    }

    async fn count_keys_referencing(&self, key_model_id: &str) -> Result<u64, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT count() AS total FROM key WHERE key_model_id = $key_model_id GROUP ALL;")
            .bind(("key_model_id", key_model_id.to_string()))
            .await
            .map_err(|err| map_query_err("key reference count", err))?;
        #[derive(Deserialize)]
        struct CountRow {
            total: u64,
        }
        let rows: Vec<CountRow> = response
            .take(0)
            .map_err(|err| map_query_err("key reference count", err))?;
        Ok(rows.into_iter().next().map(|row| row.total).unwrap_or(0))
    }

    fn watch_keys(&self) -> broadcast::Receiver<ChangeEvent<KeyRecord>> {
        self.key_events.subscribe()
    }

    //
    // LEVELS
    //

    async fn create_level(&self, record: LevelRecord) -> Result<LevelRecord, DatabaseError> {
        let mut response = self
            .db
            .query("CREATE type::thing('level', $id) CONTENT { priority: $priority, description: $description };")
            .bind(("id", record.id.clone()))
            .bind(("priority", record.priority))
            .bind(("description", record.description.clone()))
            .await
            .map_err(|err| map_write_err("level", &record.id, err))?;
        let rows: Vec<LevelRow> = response
            .take(0)
            .map_err(|err| map_write_err("level", &record.id, err))?;
        let stored = rows
            .into_iter()
            .next()
            .map(LevelRecord::from)
            .ok_or_else(|| DatabaseError::query_failed("level create returned no record"))?;
        let _ = self
            .level_events
            .send(ChangeEvent::upsert(ChangeOp::Insert, stored.id.clone(), stored.clone()));
        Ok(stored)
    }

    async fn get_level(&self, id: &str) -> Result<Option<LevelRecord>, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::thing('level', $id);")
            .bind(("id", id.to_string()))
            .await
            .map_err(|err| map_query_err("level get", err))?;
        let rows: Vec<LevelRow> = response
            .take(0)
            .map_err(|err| map_query_err("level get", err))?;
        Ok(rows.into_iter().next().map(LevelRecord::from))
    }

    async fn update_level(
        &self,
        id: &str,
        patch: LevelPatch,
    ) -> Result<Option<LevelRecord>, DatabaseError> {
        let mut patch_doc = serde_json::Map::new();
        if let Some(priority) = patch.priority {
            patch_doc.insert("priority".to_string(), json!(priority));
        }
        if let Some(description) = patch.description {
            patch_doc.insert("description".to_string(), Value::String(description));
        }

        let mut response = self
            .db
            .query("UPDATE type::thing('level', $id) MERGE $patch RETURN AFTER;")
            .bind(("id", id.to_string()))
            .bind(("patch", Value::Object(patch_doc)))
            .await
            .map_err(|err| map_write_err("level priority", id, err))?;
        let rows: Vec<LevelRow> = response
            .take(0)
            .map_err(|err| map_write_err("level priority", id, err))?;
        let updated = rows.into_iter().next().map(LevelRecord::from);
        if let Some(record) = &updated {
            let _ = self
                .level_events
                .send(ChangeEvent::upsert(ChangeOp::Update, id, record.clone()));
        }
        Ok(updated)
    }

    async fn delete_level(&self, id: &str) -> Result<bool, DatabaseError> {
        let existed = self.get_level(id).await?.is_some();
        if !existed {
            return Ok(false);
        }
        self.db
            .query("DELETE type::thing('level', $id);")
            .bind(("id", id.to_string()))
            .await
            .map_err(|err| map_query_err("level delete", err))?;
        let _ = self.level_events.send(ChangeEvent::delete(id));
        Ok(true)
    }

    async fn list_levels(&self) -> Result<Vec<LevelRecord>, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM level ORDER BY priority ASC;")
            .await
            .map_err(|err| map_query_err("level list", err))?;
        let rows: Vec<LevelRow> = response
            .take(0)
            .map_err(|err| map_query_err("level list", err))?;
        Ok(rows.into_iter().map(LevelRecord::from).collect())
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
        let composite = format!(
            "{}/{}/{}",
            record.level_id, record.expanded_id, record.key_id
        );
        let mut response = self
            .db
            .query("CREATE level_data CONTENT { level_id: $level_id, expanded_id: $expanded_id, key_id: $key_id, facts: $facts, data: $data, priority: $priority };")
            .bind(("level_id", record.level_id.clone()))
            .bind(("expanded_id", record.expanded_id.clone()))
            .bind(("key_id", record.key_id.clone()))
            .bind(("facts", record.facts.clone()))
            .bind(("data", record.data.clone()))
            .bind(("priority", record.priority))
            .await
            .map_err(|err| map_write_err("level data", &composite, err))?;
        let rows: Vec<LevelDataRow> = response
            .take(0)
            .map_err(|err| map_write_err("level data", &composite, err))?;
        rows.into_iter()
            .next()
            .map(LevelDataRecord::from)
            .ok_or_else(|| DatabaseError::query_failed("level data create returned no record"))
    }

    async fn get_level_data(
        &self,
        id: &LevelDataId,
    ) -> Result<Option<LevelDataRecord>, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM level_data WHERE key_id = $key_id AND expanded_id = $expanded_id AND level_id = $level_id LIMIT 1;")
            .bind(("key_id", id.key_id.clone()))
            .bind(("expanded_id", id.expanded_id.clone()))
            .bind(("level_id", id.level_id.clone()))
            .await
            .map_err(|err| map_query_err("level data get", err))?;
        let rows: Vec<LevelDataRow> = response
            .take(0)
            .map_err(|err| map_query_err("level data get", err))?;
        Ok(rows.into_iter().next().map(LevelDataRecord::from))
    }

    async fn update_level_data(
        &self,
        id: &LevelDataId,
        data: Value,
    ) -> Result<Option<LevelDataRecord>, DatabaseError> {
        let mut response = self
            .db
            .query("UPDATE level_data SET data = $data WHERE key_id = $key_id AND expanded_id = $expanded_id AND level_id = $level_id RETURN AFTER;")
            .bind(("data", data))
            .bind(("key_id", id.key_id.clone()))
            .bind(("expanded_id", id.expanded_id.clone()))
            .bind(("level_id", id.level_id.clone()))
            .await
            .map_err(|err| map_query_err("level data update", err))?;
        let rows: Vec<LevelDataRow> = response
            .take(0)
            .map_err(|err| map_query_err("level data update", err))?;
        Ok(rows.into_iter().next().map(LevelDataRecord::from))
    }

    async fn delete_level_data(&self, id: &LevelDataId) -> Result<bool, DatabaseError> {
        let mut response = self
            .db
            .query("DELETE level_data WHERE key_id = $key_id AND expanded_id = $expanded_id AND level_id = $level_id RETURN BEFORE;")
            .bind(("key_id", id.key_id.clone()))
            .bind(("expanded_id", id.expanded_id.clone()))
            .bind(("level_id", id.level_id.clone()))
            .await
            .map_err(|err| map_query_err("level data delete", err))?;
        let rows: Vec<LevelDataRow> = response
            .take(0)
            .map_err(|err| map_query_err("level data delete", err))?;
        Ok(!rows.is_empty())
    }

    async fn search_level_data_by_key(
        &self,
        key_id: &str,
        expanded_ids: &[String],
    ) -> Result<Vec<LevelDataRecord>, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM level_data WHERE key_id = $key_id AND expanded_id IN $expanded ORDER BY priority ASC, level_id ASC;")
            .bind(("key_id", key_id.to_string()))
            .bind(("expanded", expanded_ids.to_vec()))
            .await
            .map_err(|err| map_query_err("level data search", err))?;
        let rows: Vec<LevelDataRow> = response
            .take(0)
            .map_err(|err| map_query_err("level data search", err))?;
        Ok(rows.into_iter().map(LevelDataRecord::from).collect())
    }

    async fn search_level_data(
        &self,
        query: LevelDataQuery,
    ) -> Result<Vec<LevelDataRecord>, DatabaseError> {
        let mut conditions = Vec::new();
        if query.key_id.is_some() {
            conditions.push("key_id = $key_id");
        }
        if query.level_id.is_some() {
            conditions.push("level_id = $level_id");
        }
        if query.expanded_id.is_some() {
            conditions.push("expanded_id = $expanded_id");
        }
        if query.fact.is_some() {
            conditions.push("facts[$fact_key] = $fact_value");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        let direction = match query.order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        let mut statement = format!(
            "SELECT * FROM level_data{where_clause} ORDER BY {} {direction}",
            query.sort.field()
        );
        if query.limit.is_some() {
            statement.push_str(" LIMIT $limit START $start");
        }
        statement.push(';');

        let mut prepared = self.db.query(statement);
        if let Some(key_id) = query.key_id {
            prepared = prepared.bind(("key_id", key_id));
        }
        if let Some(level_id) = query.level_id {
            prepared = prepared.bind(("level_id", level_id));
        }
        if let Some(expanded_id) = query.expanded_id {
            prepared = prepared.bind(("expanded_id", expanded_id));
        }
        if let Some((fact_key, fact_value)) = query.fact {
            prepared = prepared
                .bind(("fact_key", fact_key))
                .bind(("fact_value", fact_value));
        }
        if let Some(limit) = query.limit {
            prepared = prepared
                .bind(("limit", limit as i64))
                .bind(("start", (query.page * limit) as i64));
        }
        let mut response = prepared
            .await
            .map_err(|err| map_query_err("level data search", err))?;
        let rows: Vec<LevelDataRow> = response
            .take(0)
            .map_err(|err| map_query_err("level data search", err))?;
        Ok(rows.into_iter().map(LevelDataRecord::from).collect())
    }

    async fn update_priority_by_level(
        &self,
        level_id: &str,
        priority: i64,
    ) -> Result<u64, DatabaseError> {
        let mut response = self
            .db
            .query("UPDATE level_data SET priority = $priority WHERE level_id = $level_id RETURN AFTER;")
            .bind(("priority", priority))
            .bind(("level_id", level_id.to_string()))
            .await
            .map_err(|err| map_query_err("level data priority rewrite", err))?;
        let rows: Vec<LevelDataRow> = response
            .take(0)
            .map_err(|err| map_query_err("level data priority rewrite", err))?;
        Ok(rows.len() as u64)
    }

    async fn delete_level_data_for_level(&self, level_id: &str) -> Result<u64, DatabaseError> {
        let mut response = self
            .db
            .query("DELETE level_data WHERE level_id = $level_id RETURN BEFORE;")
            .bind(("level_id", level_id.to_string()))
            .await
            .map_err(|err| map_query_err("level data cascade", err))?;
        let rows: Vec<LevelDataRow> = response
            .take(0)
            .map_err(|err| map_query_err("level data cascade", err))?;
        Ok(rows.len() as u64)
    }

    async fn delete_level_data_for_key(&self, key_id: &str) -> Result<u64, DatabaseError> {
        let mut response = self
            .db
            .query("DELETE level_data WHERE key_id = $key_id RETURN BEFORE;")
            .bind(("key_id", key_id.to_string()))
            .await
            .map_err(|err| map_query_err("level data cascade", err))?;
        let rows: Vec<LevelDataRow> = response
            .take(0)
            .map_err(|err| map_query_err("level data cascade", err))?;
        Ok(rows.len() as u64)
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
        // Exact equality on the canonical sorted pair array - never a
        // subset match
        let mut response = self
            .db
            .query("SELECT * FROM lookup_cache WHERE key_id = $key_id AND merge = $merge AND facts = $facts LIMIT 1;")
            .bind(("key_id", key_id.to_string()))
            .bind(("merge", merge))
            .bind(("facts", canonical_facts(facts)))
            .await
            .map_err(|err| map_query_err("cache get", err))?;
        // The record id is dropped by deserialising straight into the
        // cache entry shape
        let rows: Vec<LookupCacheEntry> = response
            .take(0)
            .map_err(|err| map_query_err("cache get", err))?;
        Ok(rows.into_iter().next().map(|entry| entry.result))
    }

    async fn cache_put(
        &self,
        key_id: &str,
        facts: &Facts,
        merge: bool,
        result: Value,
    ) -> Result<(), DatabaseError> {
        let pairs: Vec<FactPair> = canonical_facts(facts);
        let mut response = self
            .db
            .query("DELETE lookup_cache WHERE key_id = $key_id AND merge = $merge AND facts = $facts;")
            .query("CREATE lookup_cache CONTENT { key_id: $key_id, merge: $merge, facts: $facts, result: $result };")
            .bind(("key_id", key_id.to_string()))
            .bind(("merge", merge))
            .bind(("facts", pairs))
            .bind(("result", result))
            .await
            .map_err(|err| map_query_err("cache put", err))?;
        let _: Vec<Value> = response
            .take(0)
            .map_err(|err| map_query_err("cache put", err))?;
        let _: Vec<LookupCacheEntry> = response
            .take(1)
            .map_err(|err| map_query_err("cache put", err))?;
        Ok(())
    }

    async fn cache_invalidate(&self, key_id: &str, facts: &Facts) -> Result<(), DatabaseError> {
        if facts.is_empty() {
            self.db
                .query("DELETE lookup_cache WHERE key_id = $key_id;")
                .bind(("key_id", key_id.to_string()))
                .await
                .map_err(|err| map_query_err("cache invalidate", err))?;
            return Ok(());
        }
        // Superset matching: drop entries whose stored facts contain every
        // pair of the mutation's fact map
        self.db
            .query("DELETE lookup_cache WHERE key_id = $key_id AND facts CONTAINSALL $facts;")
            .bind(("key_id", key_id.to_string()))
            .bind(("facts", canonical_facts(facts)))
            .await
            .map_err(|err| map_query_err("cache invalidate", err))?;
        Ok(())
    }

    async fn cache_clear(&self) -> Result<(), DatabaseError> {
        self.db
            .query("DELETE lookup_cache;")
            .await
            .map_err(|err| map_query_err("cache clear", err))?;
        Ok(())
    }

    //
    // NODE GROUPS
    //

    async fn create_node_group(&self, group: NodeGroup) -> Result<NodeGroup, DatabaseError> {
        let mut response = self
            .db
            .query("CREATE type::thing('node_group', $id) CONTENT { filters: $filters, nodes: $nodes, teams: $teams };")
            .bind(("id", group.id.clone()))
            .bind(("filters", group.filters.clone()))
            .bind(("nodes", group.nodes.clone()))
            .bind(("teams", group.teams.clone()))
            .await
            .map_err(|err| map_write_err("node group", &group.id, err))?;
        let rows: Vec<NodeGroupRow> = response
            .take(0)
            .map_err(|err| map_write_err("node group", &group.id, err))?;
        let stored = rows
            .into_iter()
            .next()
            .map(NodeGroup::from)
            .ok_or_else(|| DatabaseError::query_failed("node group create returned no record"))?;
        let _ = self
            .node_group_events
            .send(ChangeEvent::upsert(ChangeOp::Insert, stored.id.clone(), stored.clone()));
        Ok(stored)
    }

    async fn get_node_group(&self, id: &str) -> Result<Option<NodeGroup>, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::thing('node_group', $id);")
            .bind(("id", id.to_string()))
            .await
            .map_err(|err| map_query_err("node group get", err))?;
        let rows: Vec<NodeGroupRow> = response
            .take(0)
            .map_err(|err| map_query_err("node group get", err))?;
        Ok(rows.into_iter().next().map(NodeGroup::from))
    }

    async fn update_node_group(
        &self,
        id: &str,
        patch: NodeGroupPatch,
    ) -> Result<Option<NodeGroup>, DatabaseError> {
        let mut patch_doc = serde_json::Map::new();
        if let Some(filters) = patch.filters {
            patch_doc.insert(
                "filters".to_string(),
                serde_json::to_value(filters)
                    .map_err(|err| DatabaseError::serialization(err.to_string()))?,
            );
        }
        if let Some(teams) = patch.teams {
            patch_doc.insert("teams".to_string(), json!(teams));
        }

        let mut response = self
            .db
            .query("UPDATE type::thing('node_group', $id) MERGE $patch RETURN AFTER;")
            .bind(("id", id.to_string()))
            .bind(("patch", Value::Object(patch_doc)))
            .await
            .map_err(|err| map_query_err("node group update", err))?;
        let rows: Vec<NodeGroupRow> = response
            .take(0)
            .map_err(|err| map_query_err("node group update", err))?;
        let updated = rows.into_iter().next().map(NodeGroup::from);
        if let Some(group) = &updated {
            let _ = self
                .node_group_events
                .send(ChangeEvent::upsert(ChangeOp::Update, id, group.clone()));
        }
        Ok(updated)
    }

    async fn delete_node_group(&self, id: &str) -> Result<bool, DatabaseError> {
        let existed = self.get_node_group(id).await?.is_some();
        if !existed {
            return Ok(false);
        }
        self.db
            .query("DELETE type::thing('node_group', $id);")
            .bind(("id", id.to_string()))
            .await
            .map_err(|err| map_query_err("node group delete", err))?;
        let _ = self.node_group_events.send(ChangeEvent::delete(id));
        Ok(true)
    }

    async fn list_node_groups(&self) -> Result<Vec<NodeGroup>, DatabaseError> {
        let mut response = self
            .db
            .query("SELECT * FROM node_group ORDER BY id ASC;")
            .await
            .map_err(|err| map_query_err("node group list", err))?;
        let rows: Vec<NodeGroupRow> = response
            .take(0)
            .map_err(|err| map_query_err("node group list", err))?;
        Ok(rows.into_iter().map(NodeGroup::from).collect())
    }

    async fn rewrite_group_membership(
        &self,
        node_id: &str,
        matched: &[String],
    ) -> Result<(), DatabaseError> {
        let mut response = self
            .db
            .query("UPDATE node_group SET nodes -= $node WHERE $node IN nodes AND record::id(id) NOT IN $matched RETURN AFTER;")
            .query("UPDATE node_group SET nodes += $node WHERE record::id(id) IN $matched AND $node NOT IN nodes RETURN AFTER;")
            .bind(("node", node_id.to_string()))
            .bind(("matched", matched.to_vec()))
            .await
            .map_err(|err| map_query_err("membership rewrite", err))?;
        let removed: Vec<NodeGroupRow> = response
            .take(0)
            .map_err(|err| map_query_err("membership rewrite", err))?;
        let added: Vec<NodeGroupRow> = response
            .take(1)
            .map_err(|err| map_query_err("membership rewrite", err))?;
        for row in removed.into_iter().chain(added) {
            let group = NodeGroup::from(row);
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
