//! Shared test harness: one engine instance over the in-memory store.

#![allow(dead_code)]

use std::sync::Arc;

use stratum_core::db::MemoryStore;
use stratum_core::services::Stratum;
use stratum_hiera::Facts;

/// Wire a fresh engine instance over an empty in-memory store
pub async fn stratum() -> Stratum {
    Stratum::with_store(Arc::new(MemoryStore::new()))
        .await
        .expect("wiring an instance over an empty store")
}

/// Reload the catalogue projections after admin writes
///
/// Tests drive projection updates explicitly instead of racing the
/// watcher tasks; the watcher path is covered by the sync suite.
pub async fn refresh(stratum: &Stratum) {
    stratum
        .sync()
        .load_snapshots()
        .await
        .expect("snapshot reload");
}

pub fn facts(pairs: &[(&str, &str)]) -> Facts {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
