//! Hiera Engine
//!
//! Orchestrates registries, template expansion, the level-data store and
//! the lookup cache to answer lookups and perform level-data writes.
//!
//! # Lookup
//!
//! 1. Reject unknown keys
//! 2. Probe the cache (exact canonical-facts equality)
//! 3. Expand every level of the ordered snapshot with the request's
//!    facts; levels with missing placeholder facts are skipped, not errors
//! 4. One store query fetches all candidate rows, sorted ascending by
//!    priority (lower number wins)
//! 5. First match wins; with `merge`, all rows are combined lowest
//!    precedence first so higher-priority values override
//! 6. The result is validated through the key's model, memoised and
//!    returned
//!
//! # Write discipline
//!
//! Cache invalidation always runs after the store commit. A lookup racing
//! a write may briefly repopulate the cache with the pre-write value; the
//! write's invalidation step removes it. Engines hold no cross-operation
//! locks, so cancellation before the commit rolls back cleanly.

use std::sync::Arc;

use serde_json::Value;
use stratum_hiera::schema::type_name;
use stratum_hiera::{merge, template, Facts, HieraError, KeyModel, KeyModelRegistry, KeyRegistry};
use tracing::debug;

use crate::db::HieraStore;
use crate::models::{LevelDataId, LevelDataPatch, LevelDataRecord};
use crate::registry::LevelRegistry;
use crate::services::error::ServiceError;

/// The lookup and level-data engine
///
/// Cheap to share behind `Arc`; a process may host several independent
/// engines, each wired to its own store and registries.
pub struct HieraEngine {
    store: Arc<dyn HieraStore>,
    key_models: Arc<KeyModelRegistry>,
    keys: Arc<KeyRegistry>,
    levels: Arc<LevelRegistry>,
}

impl HieraEngine {
    pub fn new(
        store: Arc<dyn HieraStore>,
        key_models: Arc<KeyModelRegistry>,
        keys: Arc<KeyRegistry>,
        levels: Arc<LevelRegistry>,
    ) -> Self {
        Self {
            store,
            key_models,
            keys,
            levels,
        }
    }

    /// Resolve the effective value of `key_id` under `facts`
    ///
    /// With `merge = false`, the highest-precedence contributing row wins.
    /// With `merge = true`, all contributing rows are deep-merged.
    pub async fn lookup(
        &self,
        key_id: &str,
        facts: &Facts,
        merge: bool,
    ) -> Result<Value, ServiceError> {
        let entry = self.keys.get(key_id).await?;

        if let Some(cached) = self.store.cache_get(key_id, facts, merge).await? {
            debug!(key_id, merge, "lookup served from cache");
            return Ok(cached);
        }

        // Resolved at read time; a degraded projection surfaces as a
        // retryable KeyModelNotFound
        let model = self.key_models.get(&entry.key_model_id).await?;

        let rows = self.fan_out(key_id, facts).await?;
        let result = if merge {
            self.merge_rows(key_id, model.as_ref(), &rows)?
        } else {
            let first = rows.first().ok_or_else(|| ServiceError::NoDataFound {
                key_id: key_id.to_string(),
            })?;
            debug!(
                key_id,
                level_id = %first.level_id,
                expanded_id = %first.expanded_id,
                priority = first.priority,
                "lookup matched"
            );
            model.validate(&first.data)?
        };

        self.store
            .cache_put(key_id, facts, merge, result.clone())
            .await?;
        Ok(result)
    }

    /// Expand the ordered level snapshot and fetch candidate rows
    async fn fan_out(
        &self,
        key_id: &str,
        facts: &Facts,
    ) -> Result<Vec<LevelDataRecord>, ServiceError> {
        let levels = self.levels.ordered().await;
        let mut expanded = Vec::with_capacity(levels.len());
        for level in levels.iter() {
            match template::expand(&level.id, facts) {
                Ok(expanded_id) => expanded.push(expanded_id),
                // A level whose placeholders are not all covered by the
                // request's facts cannot contribute; skip it
                Err(HieraError::MissingFact { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        if expanded.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .search_level_data_by_key(key_id, &expanded)
            .await?)
    }

    /// Deep-merge all contributing rows; rows arrive highest precedence
    /// first and the fold applies them last so their values win
    fn merge_rows(
        &self,
        key_id: &str,
        model: &dyn KeyModel,
        rows: &[LevelDataRecord],
    ) -> Result<Value, ServiceError> {
        if rows.is_empty() {
            return Err(ServiceError::NoDataFound {
                key_id: key_id.to_string(),
            });
        }
        let mut validated = Vec::with_capacity(rows.len());
        for row in rows {
            if !row.data.is_object() {
                return Err(ServiceError::InvalidData(HieraError::violation(
                    "$",
                    "object (merge lookup)",
                    type_name(&row.data),
                )));
            }
            debug!(
                key_id,
                level_id = %row.level_id,
                expanded_id = %row.expanded_id,
                priority = row.priority,
                "merge contribution"
            );
            validated.push(model.validate(&row.data)?);
        }
        let merged = merge::merge_ordered(validated.iter());
        // The merged document must satisfy the model as well; this also
        // restores set semantics on uniqueItems arrays
        Ok(model.validate(&merged)?)
    }

    /// Store one concrete value for a key within a level
    pub async fn create_level_data(
        &self,
        level_id: &str,
        expanded_id: &str,
        key_id: &str,
        facts: Facts,
        data: Value,
    ) -> Result<LevelDataRecord, ServiceError> {
        let entry = self.keys.get(key_id).await?;
        let model = self.key_models.get(&entry.key_model_id).await?;
        let validated = model.validate(&data)?;

        let level = self
            .store
            .get_level(level_id)
            .await?
            .ok_or_else(|| ServiceError::LevelNotFound {
                id: level_id.to_string(),
            })?;

        let produced = template::expand(level_id, &facts)?;
        if produced != expanded_id {
            return Err(ServiceError::InvalidData(HieraError::violation(
                "$.expanded_id",
                format!("expansion of {level_id} ({produced})"),
                expanded_id,
            )));
        }
        let facts = template::normalize_facts(level_id, &facts);

        let stored = self
            .store
            .create_level_data(LevelDataRecord {
                level_id: level_id.to_string(),
                expanded_id: expanded_id.to_string(),
                key_id: key_id.to_string(),
                facts: facts.clone(),
                data: validated,
                priority: level.priority,
            })
            .await?;

        // Invalidation runs only after the commit
        self.store.cache_invalidate(key_id, &facts).await?;
        Ok(stored)
    }

    /// Update the stored value of a level-data row
    pub async fn update_level_data(
        &self,
        id: &LevelDataId,
        patch: LevelDataPatch,
    ) -> Result<LevelDataRecord, ServiceError> {
        let existing = self
            .store
            .get_level_data(id)
            .await?
            .ok_or_else(|| ServiceError::level_data_not_found(id))?;

        let updated = match patch.data {
            Some(data) => {
                let entry = self.keys.get(&id.key_id).await?;
                let model = self.key_models.get(&entry.key_model_id).await?;
                let validated = model.validate(&data)?;
                self.store
                    .update_level_data(id, validated)
                    .await?
                    .ok_or_else(|| ServiceError::level_data_not_found(id))?
            }
            None => existing.clone(),
        };

        self.store
            .cache_invalidate(&id.key_id, &existing.facts)
            .await?;
        Ok(updated)
    }

    /// Delete a level-data row
    pub async fn delete_level_data(&self, id: &LevelDataId) -> Result<(), ServiceError> {
        let existing = self
            .store
            .get_level_data(id)
            .await?
            .ok_or_else(|| ServiceError::level_data_not_found(id))?;

        if !self.store.delete_level_data(id).await? {
            return Err(ServiceError::level_data_not_found(id));
        }
        self.store
            .cache_invalidate(&id.key_id, &existing.facts)
            .await?;
        Ok(())
    }

    /// Fetch a stored level-data row
    pub async fn get_level_data(&self, id: &LevelDataId) -> Result<LevelDataRecord, ServiceError> {
        self.store
            .get_level_data(id)
            .await?
            .ok_or_else(|| ServiceError::level_data_not_found(id))
    }

    /// Validate a candidate value against whatever model `key_model_id`
    /// resolves to right now
    pub async fn validate_key_data(
        &self,
        key_model_id: &str,
        data: &Value,
    ) -> Result<Value, ServiceError> {
        let model = self.key_models.get(key_model_id).await?;
        Ok(model.validate(data)?)
    }
}
