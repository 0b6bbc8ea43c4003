//! In-Memory Projections
//!
//! Registries projected out of the document store by the catalogue
//! synchroniser: the ordered level sequence used by every lookup and the
//! node-group catalogue used by membership evaluation.
//!
//! Single-writer (the synchroniser) / many-reader. Readers take `Arc`
//! snapshots, so a lookup observes one consistent level sequence for its
//! whole fan-out while projection writes swap the `Arc` underneath.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::db::events::{ChangeEvent, ChangeOp};
use crate::models::{LevelRecord, NodeGroup};

/// Ordered sequence of levels, sorted ascending by priority
///
/// Lower priority numbers take precedence, so the first level of the
/// snapshot is the strongest.
pub struct LevelRegistry {
    levels: RwLock<Arc<Vec<LevelRecord>>>,
}

impl LevelRegistry {
    pub fn new() -> Self {
        Self {
            levels: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Snapshot of the ordered levels; immutable for the caller's lifetime
    pub async fn ordered(&self) -> Arc<Vec<LevelRecord>> {
        self.levels.read().await.clone()
    }

    /// Replace the whole projection (snapshot load)
    pub async fn replace_all(&self, mut levels: Vec<LevelRecord>) {
        levels.sort_by_key(|level| level.priority);
        *self.levels.write().await = Arc::new(levels);
    }

    /// Apply one change-feed event (idempotent)
    pub async fn apply(&self, event: &ChangeEvent<LevelRecord>) {
        let mut guard = self.levels.write().await;
        let mut levels: Vec<LevelRecord> = guard
            .iter()
            .filter(|level| level.id != event.document_key)
            .cloned()
            .collect();
        if event.op != ChangeOp::Delete {
            if let Some(record) = &event.full_document {
                levels.push(record.clone());
            }
        }
        levels.sort_by_key(|level| level.priority);
        *guard = Arc::new(levels);
    }
}

impl Default for LevelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Projection of the node-group catalogue
pub struct NodeGroupRegistry {
    groups: RwLock<Arc<HashMap<String, NodeGroup>>>,
}

impl NodeGroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub async fn snapshot(&self) -> Arc<HashMap<String, NodeGroup>> {
        self.groups.read().await.clone()
    }

    pub async fn replace_all(&self, groups: Vec<NodeGroup>) {
        let map = groups
            .into_iter()
            .map(|group| (group.id.clone(), group))
            .collect();
        *self.groups.write().await = Arc::new(map);
    }

    /// Apply one change-feed event (idempotent)
    pub async fn apply(&self, event: &ChangeEvent<NodeGroup>) {
        let mut guard = self.groups.write().await;
        let mut map: HashMap<String, NodeGroup> = guard.as_ref().clone();
        match (&event.op, &event.full_document) {
            (ChangeOp::Delete, _) => {
                map.remove(&event.document_key);
            }
            (_, Some(group)) => {
                map.insert(event.document_key.clone(), group.clone());
            }
            (_, None) => {}
        }
        *guard = Arc::new(map);
    }
}

impl Default for NodeGroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}
