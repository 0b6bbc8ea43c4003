//! Key Model and Key Registries
//!
//! In-process catalogues backing the engine: the key-model registry maps
//! prefixed model ids to validators, the key registry maps key ids to
//! their model binding. Both are single-writer (the change-stream
//! synchroniser) / many-reader structures; readers get owned snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::HieraError;
use crate::model::{builtin_models, is_dynamic_model_id, KeyModel, SchemaModel};

/// Namespaced catalogue of key-model validators
///
/// The four built-in models are registered at construction and cannot be
/// removed. Dynamic models are compiled from their schema on registration;
/// re-registration replaces the previous compilation, which makes
/// change-stream projection idempotent.
pub struct KeyModelRegistry {
    models: RwLock<HashMap<String, Arc<dyn KeyModel>>>,
    builtins: Vec<String>,
}

impl KeyModelRegistry {
    pub fn new() -> Self {
        let mut models = HashMap::new();
        let mut builtins = Vec::new();
        for (id, model) in builtin_models() {
            builtins.push(id.clone());
            models.insert(id, model);
        }
        Self {
            models: RwLock::new(models),
            builtins,
        }
    }

    /// Compile and register a user-defined model
    ///
    /// Fails with [`HieraError::InvalidModelId`] unless the id carries the
    /// `dynamic:` prefix, and with [`HieraError::InvalidSchema`] when the
    /// schema fragment does not compile.
    pub async fn register_dynamic(
        &self,
        id: &str,
        description: &str,
        schema: &Value,
    ) -> Result<(), HieraError> {
        if !is_dynamic_model_id(id) {
            return Err(HieraError::InvalidModelId { id: id.to_string() });
        }
        let model = SchemaModel::new(description, schema)?;
        self.models
            .write()
            .await
            .insert(id.to_string(), Arc::new(model));
        Ok(())
    }

    /// Remove a user-defined model
    ///
    /// Built-in ids are refused. Reference checks (`ModelInUse`) are the
    /// admin surface's concern; projections call this unconditionally.
    pub async fn remove_dynamic(&self, id: &str) -> Result<(), HieraError> {
        if self.builtins.iter().any(|builtin| builtin == id) {
            return Err(HieraError::BuiltinModel { id: id.to_string() });
        }
        if !is_dynamic_model_id(id) {
            return Err(HieraError::InvalidModelId { id: id.to_string() });
        }
        match self.models.write().await.remove(id) {
            Some(_) => Ok(()),
            None => Err(HieraError::ModelNotFound { id: id.to_string() }),
        }
    }

    /// Resolve a model by its prefixed id
    pub async fn get(&self, id: &str) -> Result<Arc<dyn KeyModel>, HieraError> {
        self.models
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HieraError::ModelNotFound { id: id.to_string() })
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.models.read().await.contains_key(id)
    }

    /// All registered ids, sorted
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Registered dynamic ids, sorted
    pub async fn dynamic_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .models
            .read()
            .await
            .keys()
            .filter(|id| is_dynamic_model_id(id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Drop dynamic models whose id is not in `keep`
    ///
    /// Used by snapshot reloads to converge the projection after a missed
    /// delete event. Built-ins are never touched.
    pub async fn prune_dynamic(&self, keep: &HashSet<String>) {
        self.models
            .write()
            .await
            .retain(|id, _| !is_dynamic_model_id(id) || keep.contains(id));
    }

    /// Ids that may never be removed
    pub fn builtin_ids(&self) -> &[String] {
        &self.builtins
    }
}

impl Default for KeyModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A key's binding in the key registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    /// Prefixed id of the model validating this key's values
    pub key_model_id: String,
    pub deprecated: bool,
}

/// Catalogue of user-facing configuration keys
///
/// Projection of the key collection; maps each key id to the model it is
/// bound to. Values are resolved through [`KeyModelRegistry`] at read time.
pub struct KeyRegistry {
    keys: RwLock<HashMap<String, KeyEntry>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a key binding (idempotent projection write)
    pub async fn insert(&self, id: impl Into<String>, entry: KeyEntry) {
        self.keys.write().await.insert(id.into(), entry);
    }

    /// Remove a key binding; returns whether it existed
    pub async fn remove(&self, id: &str) -> bool {
        self.keys.write().await.remove(id).is_some()
    }

    /// Resolve a key's binding
    pub async fn get(&self, id: &str) -> Result<KeyEntry, HieraError> {
        self.keys
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| HieraError::KeyNotFound { id: id.to_string() })
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.keys.read().await.contains_key(id)
    }

    /// All registered key ids, sorted
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Replace the whole projection (snapshot reload)
    pub async fn replace_all(&self, entries: HashMap<String, KeyEntry>) {
        *self.keys.write().await = entries;
    }
}

impl Default for KeyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
