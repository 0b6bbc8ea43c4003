//! SurrealDB backend smoke tests on the in-memory engine, plus one
//! persistence round-trip on RocksDB.

use serde_json::json;
use stratum_core::db::{DatabaseError, HieraStore, SurrealStore};
use stratum_core::models::{
    FilterPart, FilterRule, KeyModelRecord, KeyRecord, LevelDataId, LevelDataRecord, LevelPatch,
    LevelRecord, NodeGroup,
};
use stratum_hiera::Facts;

fn facts(pairs: &[(&str, &str)]) -> Facts {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn level(id: &str, priority: i64) -> LevelRecord {
    LevelRecord {
        id: id.to_string(),
        priority,
        description: None,
    }
}

#[tokio::test]
async fn test_catalogue_round_trips() -> anyhow::Result<()> {
    let store = SurrealStore::new_in_memory().await?;

    // Key models: ids carry the prefix through the record id
    let model = store
        .create_key_model(KeyModelRecord {
            id: "dynamic:cfg".to_string(),
            description: Some("round trip".to_string()),
            schema: json!({"type": "object"}),
        })
        .await?;
    assert_eq!(model.id, "dynamic:cfg");
    let fetched = store.get_key_model("dynamic:cfg").await?.unwrap();
    assert_eq!(fetched, model);
    assert!(store.get_key_model("dynamic:ghost").await?.is_none());

    // Duplicate record ids are refused by the database
    let err = store
        .create_key_model(KeyModelRecord {
            id: "dynamic:cfg".to_string(),
            description: None,
            schema: json!({}),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::Duplicate { .. }));

    // Keys and reference counting
    store
        .create_key(KeyRecord {
            id: "cfg".to_string(),
            key_model_id: "dynamic:cfg".to_string(),
            description: None,
            deprecated: false,
        })
        .await?;
    assert_eq!(store.count_keys_referencing("dynamic:cfg").await?, 1);
    assert_eq!(store.count_keys_referencing("dynamic:other").await?, 0);

    // Levels: unique priority enforced by the index
    store.create_level(level("common", 100)).await?;
    let err = store.create_level(level("other", 100)).await.unwrap_err();
    assert!(matches!(err, DatabaseError::Duplicate { .. }));

    store.create_level(level("{env}", 50)).await?;
    let levels = store.list_levels().await?;
    assert_eq!(levels[0].id, "{env}");
    assert_eq!(levels[1].id, "common");

    let updated = store
        .update_level(
            "common",
            LevelPatch {
                priority: Some(40),
                description: None,
            },
        )
        .await?
        .unwrap();
    assert_eq!(updated.priority, 40);
    assert!(store
        .update_level("ghost", LevelPatch::default())
        .await?
        .is_none());

    Ok(())
}

#[tokio::test]
async fn test_level_data_and_cache() -> anyhow::Result<()> {
    let store = SurrealStore::new_in_memory().await?;

    let row = LevelDataRecord {
        level_id: "{env}".to_string(),
        expanded_id: "prod".to_string(),
        key_id: "db_host".to_string(),
        facts: facts(&[("env", "prod")]),
        data: json!("10.0.0.9"),
        priority: 50,
    };
    store.create_level_data(row.clone()).await?;
    store
        .create_level_data(LevelDataRecord {
            level_id: "common".to_string(),
            expanded_id: "common".to_string(),
            key_id: "db_host".to_string(),
            facts: Facts::new(),
            data: json!("10.0.0.1"),
            priority: 100,
        })
        .await?;

    // The composite key is unique
    let err = store.create_level_data(row.clone()).await.unwrap_err();
    assert!(matches!(err, DatabaseError::Duplicate { .. }));

    let fetched = store
        .get_level_data(&LevelDataId::new("{env}", "prod", "db_host"))
        .await?
        .unwrap();
    assert_eq!(fetched, row);

    // Priority-ordered fan-out
    let rows = store
        .search_level_data_by_key(
            "db_host",
            &["prod".to_string(), "common".to_string(), "stage".to_string()],
        )
        .await?;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].expanded_id, "prod");
    assert_eq!(rows[1].expanded_id, "common");

    // Bulk priority rewrite
    assert_eq!(store.update_priority_by_level("{env}", 10).await?, 1);
    let rows = store
        .search_level_data_by_key("db_host", &["prod".to_string()])
        .await?;
    assert_eq!(rows[0].priority, 10);

    // Cache: exact get, superset invalidation
    let prod = facts(&[("env", "prod")]);
    let prod_web = facts(&[("env", "prod"), ("role", "web")]);
    store.cache_put("db_host", &prod, false, json!("10.0.0.9")).await?;
    store.cache_put("db_host", &prod_web, false, json!("10.0.0.9")).await?;

    assert_eq!(
        store.cache_get("db_host", &prod, false).await?,
        Some(json!("10.0.0.9"))
    );
    // Exact equality: neither subset nor flag mismatch hits
    assert_eq!(store.cache_get("db_host", &Facts::new(), false).await?, None);
    assert_eq!(store.cache_get("db_host", &prod, true).await?, None);

    store.cache_invalidate("db_host", &prod).await?;
    assert_eq!(store.cache_get("db_host", &prod, false).await?, None);
    assert_eq!(store.cache_get("db_host", &prod_web, false).await?, None);

    // Upsert replaces in place
    store.cache_put("db_host", &prod, false, json!("a")).await?;
    store.cache_put("db_host", &prod, false, json!("b")).await?;
    assert_eq!(store.cache_get("db_host", &prod, false).await?, Some(json!("b")));

    store.cache_clear().await?;
    assert_eq!(store.cache_get("db_host", &prod, false).await?, None);

    // Cascades
    assert_eq!(store.delete_level_data_for_key("db_host").await?, 2);

    Ok(())
}

#[tokio::test]
async fn test_membership_rewrite() -> anyhow::Result<()> {
    let store = SurrealStore::new_in_memory().await?;

    for id in ["web", "db"] {
        store
            .create_node_group(NodeGroup {
                id: id.to_string(),
                filters: vec![FilterRule {
                    part: vec![FilterPart {
                        fact: "role".to_string(),
                        values: vec![id.to_string()],
                    }],
                }],
                nodes: Vec::new(),
                teams: Vec::new(),
            })
            .await?;
    }

    store
        .rewrite_group_membership("node1", &["web".to_string()])
        .await?;
    // Idempotent membership add
    store
        .rewrite_group_membership("node1", &["web".to_string()])
        .await?;
    assert_eq!(
        store.get_node_group("web").await?.unwrap().nodes,
        vec!["node1".to_string()]
    );

    store
        .rewrite_group_membership("node1", &["db".to_string()])
        .await?;
    assert!(store.get_node_group("web").await?.unwrap().nodes.is_empty());
    assert_eq!(
        store.get_node_group("db").await?.unwrap().nodes,
        vec!["node1".to_string()]
    );

    Ok(())
}

#[tokio::test]
async fn test_rocksdb_backend_opens_and_stores() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = SurrealStore::new(dir.path().join("stratum.db")).await?;

    store.create_level(level("common", 100)).await?;
    let levels = store.list_levels().await?;
    assert_eq!(levels.len(), 1);
    assert_eq!(levels[0].id, "common");

    Ok(())
}
