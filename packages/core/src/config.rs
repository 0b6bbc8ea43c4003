//! Store Backend Selection
//!
//! Serde-deserialisable configuration for the catalogue store. The
//! embedder owns how this gets populated (file, environment, flags);
//! this module only defines the shape and opens the matching backend.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::db::{DatabaseError, HieraStore, MemoryStore, SurrealStore};

fn default_path() -> PathBuf {
    PathBuf::from("./data/stratum.db")
}

fn default_namespace() -> String {
    "stratum".to_string()
}

/// Which store backend to run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Embedded SurrealDB on RocksDB under `path`
    Embedded {
        #[serde(default = "default_path")]
        path: PathBuf,
    },

    /// Embedded SurrealDB on the in-memory engine; nothing persists
    Ephemeral,

    /// Remote SurrealDB server over HTTP
    Http {
        endpoint: String,
        #[serde(default = "default_namespace")]
        namespace: String,
        #[serde(default = "default_namespace")]
        database: String,
        username: String,
        password: String,
    },

    /// Process-local maps without a database engine (tests, embedding)
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Embedded {
            path: default_path(),
        }
    }
}

/// Open the configured backend
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn HieraStore>, DatabaseError> {
    Ok(match config {
        StoreConfig::Embedded { path } => Arc::new(SurrealStore::new(path.clone()).await?),
        StoreConfig::Ephemeral => Arc::new(SurrealStore::new_in_memory().await?),
        StoreConfig::Http {
            endpoint,
            namespace,
            database,
            username,
            password,
        } => Arc::new(
            SurrealStore::new_http(endpoint, namespace, database, username, password).await?,
        ),
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config: StoreConfig = serde_json::from_value(json!({"mode": "embedded"})).unwrap();
        match config {
            StoreConfig::Embedded { path } => assert_eq!(path, default_path()),
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_http_config() {
        let config: StoreConfig = serde_json::from_value(json!({
            "mode": "http",
            "endpoint": "127.0.0.1:8000",
            "username": "root",
            "password": "root"
        }))
        .unwrap();
        match config {
            StoreConfig::Http {
                namespace,
                database,
                ..
            } => {
                assert_eq!(namespace, "stratum");
                assert_eq!(database, "stratum");
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }
}
