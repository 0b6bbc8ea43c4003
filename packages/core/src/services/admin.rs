//! Admin Surface
//!
//! Thin coordinator over the stores and the engine: validates inputs,
//! routes writes, and triggers cache invalidation. Transport and
//! authorisation live outside this crate; everything here assumes an
//! already-authorised caller.

use std::sync::Arc;

use serde_json::{json, Value};
use stratum_hiera::model::{is_dynamic_model_id, qualify_model_id, split_model_id};
use stratum_hiera::{Facts, HieraError, KeyModelRegistry, SchemaModel};
use tracing::info;

use crate::db::HieraStore;
use crate::models::{
    KeyModelRecord, KeyPatch, KeyQuery, KeyRecord, LevelDataId, LevelDataPatch, LevelDataQuery,
    LevelDataRecord, LevelPatch, LevelRecord, NodeGroup, NodeGroupPatch,
};
use crate::services::engine::HieraEngine;
use crate::services::error::ServiceError;

/// CRUD coordination over key models, keys, levels, level data and node
/// groups
pub struct AdminService {
    store: Arc<dyn HieraStore>,
    engine: Arc<HieraEngine>,
    key_models: Arc<KeyModelRegistry>,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn HieraStore>,
        engine: Arc<HieraEngine>,
        key_models: Arc<KeyModelRegistry>,
    ) -> Self {
        Self {
            store,
            engine,
            key_models,
        }
    }

    //
    // KEY MODELS
    //

    /// Create a dynamic key model
    ///
    /// The schema is compiled up front so a model that cannot validate
    /// anything is rejected before it persists.
    pub async fn create_key_model(
        &self,
        id: &str,
        description: Option<String>,
        schema: Value,
    ) -> Result<KeyModelRecord, ServiceError> {
        if !is_dynamic_model_id(id) {
            return Err(ServiceError::InvalidData(HieraError::InvalidModelId {
                id: id.to_string(),
            }));
        }
        SchemaModel::new(description.clone().unwrap_or_default(), &schema)?;
        let stored = self
            .store
            .create_key_model(KeyModelRecord {
                id: id.to_string(),
                description,
                schema,
            })
            .await?;
        info!(model = %stored.id, "key model created");
        Ok(stored)
    }

    /// Delete a dynamic key model
    ///
    /// Refused while any key references the model.
    pub async fn delete_key_model(&self, id: &str) -> Result<(), ServiceError> {
        if !is_dynamic_model_id(id) {
            let err = if self.key_models.builtin_ids().iter().any(|b| b == id) {
                HieraError::BuiltinModel { id: id.to_string() }
            } else {
                HieraError::InvalidModelId { id: id.to_string() }
            };
            return Err(ServiceError::InvalidData(err));
        }
        let references = self.store.count_keys_referencing(id).await?;
        if references > 0 {
            return Err(ServiceError::ModelInUse {
                id: id.to_string(),
                references,
            });
        }
        if !self.store.delete_key_model(id).await? {
            return Err(ServiceError::KeyModelNotFound { id: id.to_string() });
        }
        info!(model = %id, "key model deleted");
        Ok(())
    }

    /// Fetch one model: stored dynamic models, or the read-only built-in
    /// descriptors. Unprefixed ids resolve under the static namespace.
    pub async fn get_key_model(&self, id: &str) -> Result<KeyModelRecord, ServiceError> {
        let qualified = qualify_model_id(id);
        if is_dynamic_model_id(&qualified) {
            return self
                .store
                .get_key_model(&qualified)
                .await?
                .ok_or(ServiceError::KeyModelNotFound { id: qualified });
        }
        builtin_descriptor(&qualified).ok_or(ServiceError::KeyModelNotFound { id: qualified })
    }

    /// All models: built-in descriptors followed by stored dynamic models
    pub async fn list_key_models(&self) -> Result<Vec<KeyModelRecord>, ServiceError> {
        let mut models: Vec<KeyModelRecord> = self
            .key_models
            .builtin_ids()
            .iter()
            .filter_map(|id| builtin_descriptor(id))
            .collect();
        models.extend(self.store.list_key_models().await?);
        Ok(models)
    }

    //
    // KEYS
    //

    pub async fn create_key(
        &self,
        id: &str,
        key_model_id: &str,
        description: Option<String>,
        deprecated: bool,
    ) -> Result<KeyRecord, ServiceError> {
        let key_model_id = self.require_key_model(key_model_id).await?;
        let stored = self
            .store
            .create_key(KeyRecord {
                id: id.to_string(),
                key_model_id,
                description,
                deprecated,
            })
            .await?;
        info!(key = %stored.id, model = %stored.key_model_id, "key created");
        Ok(stored)
    }

    pub async fn get_key(&self, id: &str) -> Result<KeyRecord, ServiceError> {
        self.store
            .get_key(id)
            .await?
            .ok_or_else(|| ServiceError::KeyNotFound { id: id.to_string() })
    }

    pub async fn list_keys(&self, query: KeyQuery) -> Result<Vec<KeyRecord>, ServiceError> {
        Ok(self.store.list_keys(query).await?)
    }

    /// Update a key
    ///
    /// Swapping `key_model_id` re-validates every stored level-data row
    /// for the key against the new model and commits only when all pass;
    /// otherwise the key keeps its current model.
    pub async fn update_key(&self, id: &str, patch: KeyPatch) -> Result<KeyRecord, ServiceError> {
        let current = self
            .store
            .get_key(id)
            .await?
            .ok_or_else(|| ServiceError::KeyNotFound { id: id.to_string() })?;

        let mut patch = patch;
        if let Some(new_model) = patch.key_model_id.take() {
            let qualified = self.require_key_model(&new_model).await?;
            if qualified != current.key_model_id {
                let rows = self
                    .store
                    .search_level_data(LevelDataQuery {
                        key_id: Some(id.to_string()),
                        ..Default::default()
                    })
                    .await?;
                for row in &rows {
                    self.engine.validate_key_data(&qualified, &row.data).await?;
                }
                info!(
                    key = %id,
                    from = %current.key_model_id,
                    to = %qualified,
                    rows = rows.len(),
                    "key model changed, existing data re-validated"
                );
                // Normalisation may differ under the new model
                self.store.cache_invalidate(id, &Facts::new()).await?;
            }
            patch.key_model_id = Some(qualified);
        }

        self.store
            .update_key(id, patch)
            .await?
            .ok_or_else(|| ServiceError::KeyNotFound { id: id.to_string() })
    }

    /// Delete a key together with its level data and cache entries
    pub async fn delete_key(&self, id: &str) -> Result<(), ServiceError> {
        if !self.store.delete_key(id).await? {
            return Err(ServiceError::KeyNotFound { id: id.to_string() });
        }
        self.store.delete_level_data_for_key(id).await?;
        self.store.cache_invalidate(id, &Facts::new()).await?;
        info!(key = %id, "key deleted");
        Ok(())
    }

    /// Resolve and verify a model reference, returning the qualified id
    async fn require_key_model(&self, id: &str) -> Result<String, ServiceError> {
        let qualified = qualify_model_id(id);
        if is_dynamic_model_id(&qualified) {
            if self.store.get_key_model(&qualified).await?.is_none() {
                return Err(ServiceError::KeyModelNotFound { id: qualified });
            }
        } else if !self.key_models.builtin_ids().iter().any(|b| b == &qualified) {
            return Err(ServiceError::KeyModelNotFound { id: qualified });
        }
        Ok(qualified)
    }

    //
    // LEVELS
    //

    /// Create a level
    ///
    /// Rows left behind by an earlier level of the same id pick up the new
    /// priority, and the whole cache is dropped.
    pub async fn create_level(
        &self,
        id: &str,
        priority: i64,
        description: Option<String>,
    ) -> Result<LevelRecord, ServiceError> {
        let stored = self
            .store
            .create_level(LevelRecord {
                id: id.to_string(),
                priority,
                description,
            })
            .await?;
        self.store.update_priority_by_level(id, priority).await?;
        self.store.cache_clear().await?;
        info!(level = %stored.id, priority = stored.priority, "level created");
        Ok(stored)
    }

    pub async fn get_level(&self, id: &str) -> Result<LevelRecord, ServiceError> {
        self.store
            .get_level(id)
            .await?
            .ok_or_else(|| ServiceError::LevelNotFound { id: id.to_string() })
    }

    pub async fn list_levels(&self) -> Result<Vec<LevelRecord>, ServiceError> {
        Ok(self.store.list_levels().await?)
    }

    /// Update a level; a priority change propagates to every level-data
    /// row of the level
    pub async fn update_level(
        &self,
        id: &str,
        patch: LevelPatch,
    ) -> Result<LevelRecord, ServiceError> {
        let updated = self
            .store
            .update_level(id, patch.clone())
            .await?
            .ok_or_else(|| ServiceError::LevelNotFound { id: id.to_string() })?;
        if let Some(priority) = patch.priority {
            let touched = self.store.update_priority_by_level(id, priority).await?;
            info!(level = %id, priority, rows = touched, "level priority propagated");
        }
        self.store.cache_clear().await?;
        Ok(updated)
    }

    /// Delete a level together with its data rows
    pub async fn delete_level(&self, id: &str) -> Result<(), ServiceError> {
        if !self.store.delete_level(id).await? {
            return Err(ServiceError::LevelNotFound { id: id.to_string() });
        }
        let removed = self.store.delete_level_data_for_level(id).await?;
        self.store.cache_clear().await?;
        info!(level = %id, rows = removed, "level deleted");
        Ok(())
    }

    //
    // LEVEL DATA (delegated to the engine for validation + invalidation)
    //

    pub async fn create_level_data(
        &self,
        level_id: &str,
        expanded_id: &str,
        key_id: &str,
        facts: Facts,
        data: Value,
    ) -> Result<LevelDataRecord, ServiceError> {
        self.engine
            .create_level_data(level_id, expanded_id, key_id, facts, data)
            .await
    }

    pub async fn get_level_data(&self, id: &LevelDataId) -> Result<LevelDataRecord, ServiceError> {
        self.engine.get_level_data(id).await
    }

    pub async fn update_level_data(
        &self,
        id: &LevelDataId,
        patch: LevelDataPatch,
    ) -> Result<LevelDataRecord, ServiceError> {
        self.engine.update_level_data(id, patch).await
    }

    pub async fn delete_level_data(&self, id: &LevelDataId) -> Result<(), ServiceError> {
        self.engine.delete_level_data(id).await
    }

    pub async fn search_level_data(
        &self,
        query: LevelDataQuery,
    ) -> Result<Vec<LevelDataRecord>, ServiceError> {
        Ok(self.store.search_level_data(query).await?)
    }

    //
    // NODE GROUPS
    //

    pub async fn create_node_group(&self, group: NodeGroup) -> Result<NodeGroup, ServiceError> {
        Ok(self.store.create_node_group(group).await?)
    }

    pub async fn get_node_group(&self, id: &str) -> Result<NodeGroup, ServiceError> {
        self.store
            .get_node_group(id)
            .await?
            .ok_or_else(|| ServiceError::NodeGroupNotFound { id: id.to_string() })
    }

    pub async fn list_node_groups(&self) -> Result<Vec<NodeGroup>, ServiceError> {
        Ok(self.store.list_node_groups().await?)
    }

    pub async fn update_node_group(
        &self,
        id: &str,
        patch: NodeGroupPatch,
    ) -> Result<NodeGroup, ServiceError> {
        self.store
            .update_node_group(id, patch)
            .await?
            .ok_or_else(|| ServiceError::NodeGroupNotFound { id: id.to_string() })
    }

    pub async fn delete_node_group(&self, id: &str) -> Result<(), ServiceError> {
        if !self.store.delete_node_group(id).await? {
            return Err(ServiceError::NodeGroupNotFound { id: id.to_string() });
        }
        Ok(())
    }
}

/// Read-only descriptor for a built-in model
fn builtin_descriptor(id: &str) -> Option<KeyModelRecord> {
    let (_, name) = split_model_id(id);
    let (kind, description) = match name {
        "SimpleString" => ("string", "simple string"),
        "SimpleInt" => ("int", "simple int"),
        "SimpleFloat" => ("float", "simple float"),
        "SimpleBool" => ("bool", "simple bool"),
        _ => return None,
    };
    Some(KeyModelRecord {
        id: id.to_string(),
        description: Some(description.to_string()),
        schema: json!(kind),
    })
}
