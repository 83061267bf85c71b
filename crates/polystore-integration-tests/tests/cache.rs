//! Integration tests for read-through caching.

mod common;

use std::time::Duration;

use common::{PlatformHarness, params};
use futures::future::join_all;
use polystore_core::{Filter, QuerySpec};
use polystore_test::{test_context, test_user};
use serde_json::{Map, json};

#[tokio::test]
async fn concurrent_identical_reads_hit_the_provider_once() {
    let harness = PlatformHarness::start_quiet().await;
    let ctx = test_context();
    for (id, name) in [("u1", "ada"), ("u2", "grace")] {
        harness
            .platform
            .insert("users", test_user(id, name).to_flat_value(), &ctx)
            .await
            .unwrap();
    }
    let pg = harness.provider("pg");
    pg.set_delay(Some(Duration::from_millis(50)));

    let spec = QuerySpec::select("users").with_filter(Filter::eq("status", "active"));
    let reads = (0..8).map(|_| harness.platform.execute_raw_query(&spec, &ctx));
    let results: Vec<_> = join_all(reads).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(pg.calls("query:users"), 1);
    let first = &results[0].records;
    assert_eq!(first.len(), 2);
    assert!(results.iter().all(|r| &r.records == first));
}

#[tokio::test]
async fn repeated_reads_within_ttl_are_served_from_cache() {
    let harness = PlatformHarness::start_quiet().await;
    let ctx = test_context();
    harness
        .platform
        .insert("users", test_user("u1", "ada").to_flat_value(), &ctx)
        .await
        .unwrap();

    let spec = QuerySpec::select("users");
    let cold = harness.platform.execute_raw_query(&spec, &ctx).await.unwrap();
    let warm = harness.platform.execute_raw_query(&spec, &ctx).await.unwrap();
    assert!(!cold.from_cache);
    assert!(warm.from_cache);
    assert_eq!(cold.records, warm.records);
    assert_eq!(harness.provider("pg").calls("query:users"), 1);

    let stats = harness.platform.get_metrics().cache;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.fetches, 1);
}

#[tokio::test]
async fn writes_invalidate_cached_reads_of_the_table() {
    let harness = PlatformHarness::start_quiet().await;
    let ctx = test_context();
    let spec = QuerySpec::select("users");
    let before = harness.platform.execute_raw_query(&spec, &ctx).await.unwrap();
    assert_eq!(before.count, 0);

    harness
        .platform
        .insert("users", test_user("u1", "ada").to_flat_value(), &ctx)
        .await
        .unwrap();
    let after = harness.platform.execute_raw_query(&spec, &ctx).await.unwrap();
    assert!(!after.from_cache);
    assert_eq!(after.count, 1);

    let mut patch = Map::new();
    patch.insert("name".into(), json!("Ada Lovelace"));
    harness.platform.update("users", "u1", patch, &ctx).await.unwrap();
    let updated = harness.platform.execute_raw_query(&spec, &ctx).await.unwrap();
    assert!(!updated.from_cache);
    assert_eq!(updated.records[0].field("name"), Some(json!("Ada Lovelace")));
    assert_eq!(harness.provider("pg").calls("query:users"), 3);
}

#[tokio::test]
async fn writes_to_other_tables_keep_entries() {
    let harness = PlatformHarness::start_quiet().await;
    let ctx = test_context();
    let spec = QuerySpec::select("users");
    harness.platform.execute_raw_query(&spec, &ctx).await.unwrap();

    harness
        .platform
        .insert("accounts", json!({"id": "a1"}), &ctx)
        .await
        .unwrap();
    let again = harness.platform.execute_raw_query(&spec, &ctx).await.unwrap();
    assert!(again.from_cache);
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_their_ttl() {
    let harness = PlatformHarness::start_quiet().await;
    let lookup = params(json!({"id": "u1"}));
    // Contexts carry absolute deadlines, so each call after a clock jump
    // gets a fresh one.
    harness
        .platform
        .execute_named_query("get_user_by_id", lookup.clone(), &test_context())
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(30)).await;
    let warm = harness
        .platform
        .execute_named_query("get_user_by_id", lookup.clone(), &test_context())
        .await
        .unwrap();
    assert!(warm.from_cache);

    tokio::time::advance(Duration::from_secs(31)).await;
    let expired = harness
        .platform
        .execute_named_query("get_user_by_id", lookup, &test_context())
        .await
        .unwrap();
    assert!(!expired.from_cache);
    assert_eq!(harness.provider("pg").calls("query:users"), 2);
}

#[tokio::test]
async fn invalidation_by_tag_and_prefix() {
    let harness = PlatformHarness::start_quiet().await;
    let platform = &harness.platform;
    platform.cache_set("sessions:a", json!(1), None, vec!["tenant-1".into()]);
    platform.cache_set("sessions:b", json!(2), None, vec!["tenant-2".into()]);
    platform.cache_set("tokens:c", json!(3), None, Vec::new());

    assert_eq!(platform.invalidate("tenant-1"), 1);
    assert!(platform.cache_get("sessions:a").is_none());
    assert_eq!(platform.invalidate("tokens:*"), 1);
    assert_eq!(platform.cache_get("sessions:b"), Some(json!(2)));
    assert_eq!(platform.clear_cache(), 1);
}
