//! Change-Feed Synchronisers
//!
//! Keeps the in-memory projections (key models, keys, levels, node
//! groups) eventually consistent with the store. Each collection gets one
//! long-running watcher task; events apply idempotently, and a lagged
//! receiver falls back to a fresh snapshot load instead of replaying.
//!
//! Readiness: embedders call [`CatalogSync::load_snapshots`] once before
//! serving lookups, then [`CatalogSync::spawn`] for live updates. The
//! synchroniser is the only writer to the projections; admin writes
//! become visible through the feed, so a brief window of stale reads
//! exists between a write and its projection.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use stratum_hiera::{KeyEntry, KeyModelRegistry, KeyRegistry};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::events::{ChangeEvent, ChangeOp};
use crate::db::HieraStore;
use crate::models::{KeyModelRecord, KeyQuery, KeyRecord};
use crate::registry::{LevelRegistry, NodeGroupRegistry};
use crate::services::error::ServiceError;

/// Synchroniser for all four projected collections
pub struct CatalogSync {
    store: Arc<dyn HieraStore>,
    key_models: Arc<KeyModelRegistry>,
    keys: Arc<KeyRegistry>,
    levels: Arc<LevelRegistry>,
    node_groups: Arc<NodeGroupRegistry>,
}

impl CatalogSync {
    pub fn new(
        store: Arc<dyn HieraStore>,
        key_models: Arc<KeyModelRegistry>,
        keys: Arc<KeyRegistry>,
        levels: Arc<LevelRegistry>,
        node_groups: Arc<NodeGroupRegistry>,
    ) -> Self {
        Self {
            store,
            key_models,
            keys,
            levels,
            node_groups,
        }
    }

    /// Load all four snapshots; run once before declaring readiness
    pub async fn load_snapshots(&self) -> Result<(), ServiceError> {
        self.load_key_models().await?;
        self.load_keys().await?;
        self.load_levels().await?;
        self.load_node_groups().await?;
        info!("catalogue snapshots loaded");
        Ok(())
    }

    /// Spawn the four watcher loops
    ///
    /// Handles run until their change feed closes (store dropped).
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(Self::watch_key_models(Arc::clone(&self))),
            tokio::spawn(Self::watch_keys(Arc::clone(&self))),
            tokio::spawn(Self::watch_levels(Arc::clone(&self))),
            tokio::spawn(Self::watch_node_groups(self)),
        ]
    }

    //
    // SNAPSHOT LOADS
    //

    async fn load_key_models(&self) -> Result<(), ServiceError> {
        let records = self.store.list_key_models().await?;
        let mut keep = HashSet::new();
        for record in &records {
            keep.insert(record.id.clone());
            self.register_key_model(record).await;
        }
        self.key_models.prune_dynamic(&keep).await;
        Ok(())
    }

    async fn load_keys(&self) -> Result<(), ServiceError> {
        let records = self.store.list_keys(KeyQuery::default()).await?;
        let entries: HashMap<String, KeyEntry> = records
            .into_iter()
            .map(|record| {
                (
                    record.id,
                    KeyEntry {
                        key_model_id: record.key_model_id,
                        deprecated: record.deprecated,
                    },
                )
            })
            .collect();
        self.keys.replace_all(entries).await;
        Ok(())
    }

    async fn load_levels(&self) -> Result<(), ServiceError> {
        let levels = self.store.list_levels().await?;
        self.levels.replace_all(levels).await;
        Ok(())
    }

    async fn load_node_groups(&self) -> Result<(), ServiceError> {
        let groups = self.store.list_node_groups().await?;
        self.node_groups.replace_all(groups).await;
        Ok(())
    }

    //
    // WATCHERS
    //

    async fn watch_key_models(sync: Arc<Self>) {
        let mut feed = sync.store.watch_key_models();
        info!("change feed watcher started for key models");
        loop {
            match feed.recv().await {
                Ok(event) => sync.apply_key_model_event(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "key model feed lagged, reloading snapshot");
                    if let Err(err) = sync.load_key_models().await {
                        error!(%err, "key model snapshot reload failed");
                    }
                }
                Err(RecvError::Closed) => {
                    info!("key model feed closed");
                    break;
                }
            }
        }
    }

    async fn watch_keys(sync: Arc<Self>) {
        let mut feed = sync.store.watch_keys();
        info!("change feed watcher started for keys");
        loop {
            match feed.recv().await {
                Ok(event) => sync.apply_key_event(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "key feed lagged, reloading snapshot");
                    if let Err(err) = sync.load_keys().await {
                        error!(%err, "key snapshot reload failed");
                    }
                }
                Err(RecvError::Closed) => {
                    info!("key feed closed");
                    break;
                }
            }
        }
    }

    async fn watch_levels(sync: Arc<Self>) {
        let mut feed = sync.store.watch_levels();
        info!("change feed watcher started for levels");
        loop {
            match feed.recv().await {
                Ok(event) => sync.levels.apply(&event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "level feed lagged, reloading snapshot");
                    if let Err(err) = sync.load_levels().await {
                        error!(%err, "level snapshot reload failed");
                    }
                }
                Err(RecvError::Closed) => {
                    info!("level feed closed");
                    break;
                }
            }
        }
    }

    async fn watch_node_groups(sync: Arc<Self>) {
        let mut feed = sync.store.watch_node_groups();
        info!("change feed watcher started for node groups");
        loop {
            match feed.recv().await {
                Ok(event) => sync.node_groups.apply(&event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "node group feed lagged, reloading snapshot");
                    if let Err(err) = sync.load_node_groups().await {
                        error!(%err, "node group snapshot reload failed");
                    }
                }
                Err(RecvError::Closed) => {
                    info!("node group feed closed");
                    break;
                }
            }
        }
    }

    //
    // EVENT APPLICATION (idempotent)
    //

    async fn register_key_model(&self, record: &KeyModelRecord) {
        let description = record.description.as_deref().unwrap_or("dynamic model");
        if let Err(err) = self
            .key_models
            .register_dynamic(&record.id, description, &record.schema)
            .await
        {
            // A model that no longer compiles stays out of the registry;
            // keys bound to it resolve as KeyModelNotFound until fixed
            warn!(model = %record.id, %err, "skipping key model that failed to compile");
        }
    }

    async fn apply_key_model_event(&self, event: ChangeEvent<KeyModelRecord>) {
        match (event.op, event.full_document) {
            (ChangeOp::Delete, _) => {
                let _ = self.key_models.remove_dynamic(&event.document_key).await;
            }
            (_, Some(record)) => self.register_key_model(&record).await,
            (_, None) => {
                warn!(document = %event.document_key, "key model event without full document");
            }
        }
    }

    async fn apply_key_event(&self, event: ChangeEvent<KeyRecord>) {
        match (event.op, event.full_document) {
            (ChangeOp::Delete, _) => {
                self.keys.remove(&event.document_key).await;
            }
            (_, Some(record)) => {
                self.keys
                    .insert(
                        event.document_key,
                        KeyEntry {
                            key_model_id: record.key_model_id,
                            deprecated: record.deprecated,
                        },
                    )
                    .await;
            }
            (_, None) => {
                warn!(document = %event.document_key, "key event without full document");
            }
        }
    }
}
