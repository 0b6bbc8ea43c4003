//! Engine Wiring
//!
//! [`Stratum`] assembles one complete engine instance: store, registries,
//! engine, admin surface, synchroniser and membership service. No global
//! state is involved - a process may host several independent instances,
//! which the test suites rely on.

use std::sync::Arc;

use stratum_hiera::{KeyModelRegistry, KeyRegistry};
use tokio::task::JoinHandle;

use crate::config::StoreConfig;
use crate::db::HieraStore;
use crate::registry::{LevelRegistry, NodeGroupRegistry};
use crate::services::admin::AdminService;
use crate::services::engine::HieraEngine;
use crate::services::error::ServiceError;
use crate::services::membership::MembershipService;
use crate::services::sync::CatalogSync;

/// One fully wired engine instance
pub struct Stratum {
    store: Arc<dyn HieraStore>,
    key_models: Arc<KeyModelRegistry>,
    keys: Arc<KeyRegistry>,
    levels: Arc<LevelRegistry>,
    node_groups: Arc<NodeGroupRegistry>,
    engine: Arc<HieraEngine>,
    admin: Arc<AdminService>,
    sync: Arc<CatalogSync>,
    membership: Arc<MembershipService>,
}

impl Stratum {
    /// Wire an instance over an existing store and load the catalogue
    /// snapshots; the instance is ready for lookups when this returns
    pub async fn with_store(store: Arc<dyn HieraStore>) -> Result<Self, ServiceError> {
        let key_models = Arc::new(KeyModelRegistry::new());
        let keys = Arc::new(KeyRegistry::new());
        let levels = Arc::new(LevelRegistry::new());
        let node_groups = Arc::new(NodeGroupRegistry::new());

        let engine = Arc::new(HieraEngine::new(
            Arc::clone(&store),
            Arc::clone(&key_models),
            Arc::clone(&keys),
            Arc::clone(&levels),
        ));
        let admin = Arc::new(AdminService::new(
            Arc::clone(&store),
            Arc::clone(&engine),
            Arc::clone(&key_models),
        ));
        let sync = Arc::new(CatalogSync::new(
            Arc::clone(&store),
            Arc::clone(&key_models),
            Arc::clone(&keys),
            Arc::clone(&levels),
            Arc::clone(&node_groups),
        ));
        let membership = Arc::new(MembershipService::new(
            Arc::clone(&store),
            Arc::clone(&node_groups),
        ));

        sync.load_snapshots().await?;

        Ok(Self {
            store,
            key_models,
            keys,
            levels,
            node_groups,
            engine,
            admin,
            sync,
            membership,
        })
    }

    /// Open the configured store backend and wire an instance over it
    pub async fn connect(config: &StoreConfig) -> Result<Self, ServiceError> {
        let store = crate::config::open_store(config).await?;
        Self::with_store(store).await
    }

    /// Start the change-feed watchers
    pub fn start_watchers(&self) -> Vec<JoinHandle<()>> {
        Arc::clone(&self.sync).spawn()
    }

    pub fn store(&self) -> &Arc<dyn HieraStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<HieraEngine> {
        &self.engine
    }

    pub fn admin(&self) -> &Arc<AdminService> {
        &self.admin
    }

    pub fn sync(&self) -> &Arc<CatalogSync> {
        &self.sync
    }

    pub fn membership(&self) -> &Arc<MembershipService> {
        &self.membership
    }

    pub fn key_models(&self) -> &Arc<KeyModelRegistry> {
        &self.key_models
    }

    pub fn keys(&self) -> &Arc<KeyRegistry> {
        &self.keys
    }

    pub fn levels(&self) -> &Arc<LevelRegistry> {
        &self.levels
    }

    pub fn node_groups(&self) -> &Arc<NodeGroupRegistry> {
        &self.node_groups
    }
}
