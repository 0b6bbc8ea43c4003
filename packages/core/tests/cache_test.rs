//! Lookup-cache behaviour: invalidation on writes, facts-subset scope,
//! exact-match gets and level-mutation clears.

mod common;

use common::{facts, refresh, stratum};
use serde_json::json;
use stratum_core::models::{LevelDataId, LevelDataPatch};
use stratum_core::services::Stratum;
use stratum_hiera::Facts;

async fn two_tier() -> Stratum {
    let s = stratum().await;
    let admin = s.admin();
    admin.create_level("common", 100, None).await.unwrap();
    admin.create_level("{env}", 50, None).await.unwrap();
    admin
        .create_key("db_host", "static:SimpleString", None, false)
        .await
        .unwrap();
    refresh(&s).await;
    admin
        .create_level_data("common", "common", "db_host", Facts::new(), json!("10.0.0.1"))
        .await
        .unwrap();
    admin
        .create_level_data(
            "{env}",
            "prod",
            "db_host",
            facts(&[("env", "prod")]),
            json!("10.0.0.9"),
        )
        .await
        .unwrap();
    s
}

#[tokio::test]
async fn test_update_invalidates_and_next_lookup_sees_new_value() {
    let s = two_tier().await;
    let prod = facts(&[("env", "prod")]);

    let value = s.engine().lookup("db_host", &prod, false).await.unwrap();
    assert_eq!(value, json!("10.0.0.9"));
    // The result is memoised
    assert_eq!(
        s.store().cache_get("db_host", &prod, false).await.unwrap(),
        Some(json!("10.0.0.9"))
    );

    s.admin()
        .update_level_data(
            &LevelDataId::new("{env}", "prod", "db_host"),
            LevelDataPatch {
                data: Some(json!("10.0.0.10")),
            },
        )
        .await
        .unwrap();

    // The stale entry is gone and the next lookup sees the new value
    assert_eq!(
        s.store().cache_get("db_host", &prod, false).await.unwrap(),
        None
    );
    let value = s.engine().lookup("db_host", &prod, false).await.unwrap();
    assert_eq!(value, json!("10.0.0.10"));
}

#[tokio::test]
async fn test_invalidation_covers_facts_supersets_only() {
    let s = two_tier().await;
    let prod_web = facts(&[("env", "prod"), ("role", "web")]);
    let stage = facts(&[("env", "stage")]);

    // Both lookups populate the cache under their exact fact maps
    s.engine().lookup("db_host", &prod_web, false).await.unwrap();
    s.engine().lookup("db_host", &stage, false).await.unwrap();

    // Updating the env=prod row invalidates every entry whose facts are a
    // superset of {env: prod} ...
    s.admin()
        .update_level_data(
            &LevelDataId::new("{env}", "prod", "db_host"),
            LevelDataPatch {
                data: Some(json!("10.0.0.10")),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        s.store().cache_get("db_host", &prod_web, false).await.unwrap(),
        None
    );
    // ... while provably unaffected entries survive
    assert_eq!(
        s.store().cache_get("db_host", &stage, false).await.unwrap(),
        Some(json!("10.0.0.1"))
    );

    let value = s.engine().lookup("db_host", &prod_web, false).await.unwrap();
    assert_eq!(value, json!("10.0.0.10"));
}

#[tokio::test]
async fn test_cache_get_is_exact_not_subset() {
    let s = two_tier().await;
    let prod = facts(&[("env", "prod")]);
    let prod_web = facts(&[("env", "prod"), ("role", "web")]);

    s.engine().lookup("db_host", &prod_web, false).await.unwrap();

    // A stored superset entry must not answer a smaller fact map, and
    // vice versa - get is exact equality on the canonical form
    assert_eq!(s.store().cache_get("db_host", &prod, false).await.unwrap(), None);
    assert_eq!(
        s.store()
            .cache_get("db_host", &Facts::new(), false)
            .await
            .unwrap(),
        None
    );

    // The merge flag is part of the identity as well
    assert_eq!(
        s.store().cache_get("db_host", &prod_web, true).await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_delete_row_invalidates() {
    let s = two_tier().await;
    let prod = facts(&[("env", "prod")]);

    s.engine().lookup("db_host", &prod, false).await.unwrap();
    s.admin()
        .delete_level_data(&LevelDataId::new("{env}", "prod", "db_host"))
        .await
        .unwrap();

    // The env-specific row is gone; common answers now
    let value = s.engine().lookup("db_host", &prod, false).await.unwrap();
    assert_eq!(value, json!("10.0.0.1"));
}

#[tokio::test]
async fn test_level_mutation_clears_whole_cache() {
    let s = two_tier().await;
    let prod = facts(&[("env", "prod")]);
    let stage = facts(&[("env", "stage")]);

    s.engine().lookup("db_host", &prod, false).await.unwrap();
    s.engine().lookup("db_host", &stage, false).await.unwrap();

    s.admin()
        .update_level(
            "common",
            stratum_core::models::LevelPatch {
                priority: Some(90),
                description: None,
            },
        )
        .await
        .unwrap();

    // Level mutations drop everything, both keys' entries included
    assert_eq!(s.store().cache_get("db_host", &prod, false).await.unwrap(), None);
    assert_eq!(s.store().cache_get("db_host", &stage, false).await.unwrap(), None);
}

#[tokio::test]
async fn test_priority_reorder_end_to_end() {
    let s = stratum().await;
    let admin = s.admin();
    admin.create_level("A", 10, None).await.unwrap();
    admin.create_level("B", 20, None).await.unwrap();
    admin
        .create_key("k", "static:SimpleString", None, false)
        .await
        .unwrap();
    refresh(&s).await;

    admin
        .create_level_data("B", "B", "k", Facts::new(), json!("from-b"))
        .await
        .unwrap();

    // Only B has data
    assert_eq!(
        s.engine().lookup("k", &Facts::new(), false).await.unwrap(),
        json!("from-b")
    );

    // A moves behind B; still only B has data
    admin
        .update_level(
            "A",
            stratum_core::models::LevelPatch {
                priority: Some(30),
                description: None,
            },
        )
        .await
        .unwrap();
    refresh(&s).await;
    assert_eq!(
        s.engine().lookup("k", &Facts::new(), false).await.unwrap(),
        json!("from-b")
    );

    // A gains data but sits at priority 30, so B (20) still wins
    admin
        .create_level_data("A", "A", "k", Facts::new(), json!("from-a"))
        .await
        .unwrap();
    assert_eq!(
        s.engine().lookup("k", &Facts::new(), false).await.unwrap(),
        json!("from-b")
    );

    // A moves to the front; its row's denormalised priority follows
    admin
        .update_level(
            "A",
            stratum_core::models::LevelPatch {
                priority: Some(5),
                description: None,
            },
        )
        .await
        .unwrap();
    refresh(&s).await;
    assert_eq!(
        s.engine().lookup("k", &Facts::new(), false).await.unwrap(),
        json!("from-a")
    );
}
