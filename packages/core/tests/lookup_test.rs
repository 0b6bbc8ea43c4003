//! Lookup-path scenarios: priority-ordered first match, skipped levels,
//! deep merge.

mod common;

use common::{facts, refresh, stratum};
use serde_json::json;
use stratum_core::services::{ErrorKind, Stratum};
use stratum_hiera::Facts;

/// Levels `common:100` and `{env}:50` with a string key, as in the
/// classic two-tier hierarchy
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
async fn test_priority_ordered_first_match() {
    let s = two_tier().await;

    // The env-specific level (priority 50) beats common (priority 100)
    let value = s
        .engine()
        .lookup("db_host", &facts(&[("env", "prod")]), false)
        .await
        .unwrap();
    assert_eq!(value, json!("10.0.0.9"));

    // No row for env=stage, so common answers
    let value = s
        .engine()
        .lookup("db_host", &facts(&[("env", "stage")]), false)
        .await
        .unwrap();
    assert_eq!(value, json!("10.0.0.1"));
}

#[tokio::test]
async fn test_missing_placeholder_skips_level() {
    let s = two_tier().await;

    // Without an env fact the {env} level cannot expand; it is skipped,
    // not an error
    let value = s
        .engine()
        .lookup("db_host", &Facts::new(), false)
        .await
        .unwrap();
    assert_eq!(value, json!("10.0.0.1"));
}

#[tokio::test]
async fn test_unknown_key_rejected() {
    let s = two_tier().await;
    let err = s
        .engine()
        .lookup("ghost", &Facts::new(), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_no_data_found() {
    let s = stratum().await;
    s.admin().create_level("common", 100, None).await.unwrap();
    s.admin()
        .create_key("empty", "static:SimpleString", None, false)
        .await
        .unwrap();
    refresh(&s).await;

    let err = s
        .engine()
        .lookup("empty", &Facts::new(), false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("no data found"));
}

#[tokio::test]
async fn test_lookup_validates_through_model() {
    let s = stratum().await;
    s.admin().create_level("common", 100, None).await.unwrap();
    s.admin()
        .create_key("port", "static:SimpleInt", None, false)
        .await
        .unwrap();
    refresh(&s).await;

    s.admin()
        .create_level_data("common", "common", "port", Facts::new(), json!(5432))
        .await
        .unwrap();

    let value = s.engine().lookup("port", &Facts::new(), false).await.unwrap();
    assert_eq!(value, json!(5432));

    // Writes that do not satisfy the model never land
    let err = s
        .admin()
        .create_level_data("common", "common", "port2", Facts::new(), json!("x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound); // key port2 does not exist

    let err = s
        .admin()
        .create_level_data("{env}", "prod", "port", facts(&[("env", "prod")]), json!("x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

async fn merge_fixture() -> Stratum {
    let s = stratum().await;
    let admin = s.admin();
    admin.create_level("common", 100, None).await.unwrap();
    admin.create_level("{env}", 50, None).await.unwrap();
    admin
        .create_key_model(
            "dynamic:cfg",
            Some("merge fixture".to_string()),
            json!({
                "type": "object",
                "properties": {
                    "a": {"type": "string"},
                    "b": {
                        "type": "object",
                        "properties": {
                            "blub": {"type": "array", "items": {"type": "string"}},
                            "extra": {"type": "boolean"}
                        }
                    }
                }
            }),
        )
        .await
        .unwrap();
    admin
        .create_key("cfg", "dynamic:cfg", None, false)
        .await
        .unwrap();
    refresh(&s).await;

    admin
        .create_level_data(
            "common",
            "common",
            "cfg",
            Facts::new(),
            json!({"a": "x", "b": {"blub": ["a", "b"]}}),
        )
        .await
        .unwrap();
    admin
        .create_level_data(
            "{env}",
            "prod",
            "cfg",
            facts(&[("env", "prod")]),
            json!({"a": "y", "b": {"blub": ["c"], "extra": true}}),
        )
        .await
        .unwrap();
    s
}

#[tokio::test]
async fn test_deep_merge_lookup() {
    let s = merge_fixture().await;

    let merged = s
        .engine()
        .lookup("cfg", &facts(&[("env", "prod")]), true)
        .await
        .unwrap();
    assert_eq!(
        merged,
        json!({"a": "y", "b": {"blub": ["a", "b", "c"], "extra": true}})
    );
}

#[tokio::test]
async fn test_merge_of_single_row_is_that_row() {
    let s = merge_fixture().await;

    // Only the common level contributes for env=stage
    let merged = s
        .engine()
        .lookup("cfg", &facts(&[("env", "stage")]), true)
        .await
        .unwrap();
    assert_eq!(merged, json!({"a": "x", "b": {"blub": ["a", "b"]}}));
}

#[tokio::test]
async fn test_merge_rejects_scalar_contribution() {
    let s = stratum().await;
    s.admin().create_level("common", 100, None).await.unwrap();
    s.admin()
        .create_key("scalar", "static:SimpleString", None, false)
        .await
        .unwrap();
    refresh(&s).await;
    s.admin()
        .create_level_data("common", "common", "scalar", Facts::new(), json!("v"))
        .await
        .unwrap();

    let err = s
        .engine()
        .lookup("scalar", &Facts::new(), true)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
