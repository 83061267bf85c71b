//! End-to-end scenarios through the platform facade.

mod common;

use common::{PlatformHarness, params};
use polystore_core::{
    GraphTraversalQuery, QueryKind, QuerySpec, ShortestPathQuery, TechnologyType,
    TextSearchQuery, VectorSearchQuery,
};
use polystore_engine::PersistencePlatform;
use polystore_providers::default_factories;
use polystore_test::{test_config, test_context, test_document, test_edge, test_user};
use serde_json::json;

#[tokio::test]
async fn insert_then_cached_lookup_then_invalidate() {
    let harness = PlatformHarness::start_quiet().await;
    let platform = &harness.platform;
    let ctx = test_context();
    let pg = harness.provider("pg");

    let stored = platform
        .insert("users", test_user("u1", "ada").to_flat_value(), &ctx)
        .await
        .unwrap();
    assert_eq!(stored.id, "u1");
    assert_eq!(pg.calls("insert:users"), 1);
    let insert = harness.hook.events_for("insert");
    assert_eq!(insert.len(), 1);
    assert_eq!(insert[0].technology, Some(TechnologyType::Relational));

    let lookup = params(json!({"id": "u1"}));
    let first = platform
        .execute_named_query("get_user_by_id", lookup.clone(), &ctx)
        .await
        .unwrap();
    assert!(!first.from_cache);
    assert_eq!(first.records[0].field("name"), Some(json!("ada")));
    assert_eq!(pg.calls("query:users"), 1);

    let second = platform
        .execute_named_query("get_user_by_id", lookup.clone(), &ctx)
        .await
        .unwrap();
    assert!(second.from_cache);
    assert_eq!(second.records, first.records);
    assert_eq!(pg.calls("query:users"), 1);

    assert!(platform.invalidate("users") >= 1);
    let third = platform
        .execute_named_query("get_user_by_id", lookup, &ctx)
        .await
        .unwrap();
    assert!(!third.from_cache);
    assert_eq!(third.records, first.records);
    assert_eq!(pg.calls("query:users"), 2);
}

#[tokio::test]
async fn every_technology_serves_its_own_operations() {
    let platform = PersistencePlatform::builder(test_config())
        .with_factories(default_factories())
        .build()
        .unwrap();
    platform.start().await.unwrap();
    let ctx = test_context();

    for (id, embedding) in [("d1", [1.0, 0.0]), ("d2", [0.6, 0.8])] {
        platform
            .insert("docs", test_document(id, "", &embedding).to_flat_value(), &ctx)
            .await
            .unwrap();
    }
    let nearest = platform
        .vector_search(&VectorSearchQuery::new("docs", vec![1.0, 0.0], 1), &ctx)
        .await
        .unwrap();
    assert_eq!(nearest.matches.len(), 1);
    assert_eq!(nearest.matches[0].record.id, "d1");
    assert!((nearest.matches[0].distance - (1.0 - nearest.matches[0].similarity)).abs() < 1e-9);

    platform
        .insert("articles", json!({"id": "a1", "title": "Routing in practice"}), &ctx)
        .await
        .unwrap();
    platform
        .insert("articles", json!({"id": "a2", "title": "Caching"}), &ctx)
        .await
        .unwrap();
    let hits = platform
        .text_search(&TextSearchQuery::new("articles", "routing", 10), &ctx)
        .await
        .unwrap();
    assert_eq!(hits.hits.len(), 1);
    assert_eq!(hits.hits[0].record.id, "a1");

    platform
        .insert_batch(
            "follows",
            vec![
                test_edge("a", "b", 1.0).to_flat_value(),
                test_edge("b", "c", 1.0).to_flat_value(),
                test_edge("a", "c", 5.0).to_flat_value(),
            ],
            &ctx,
        )
        .await
        .unwrap();
    let reached = platform
        .graph_traversal(&GraphTraversalQuery::new("follows", "a", 2), &ctx)
        .await
        .unwrap();
    let ids: Vec<&str> = reached.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids[0], "a");
    assert_eq!(ids.len(), 3);
    let path = platform
        .shortest_path(&ShortestPathQuery::new("follows", "a", "c"), &ctx)
        .await
        .unwrap()
        .path
        .unwrap();
    assert_eq!(path.nodes, vec!["a", "b", "c"]);
    assert_eq!(path.hops(), 2);

    platform
        .insert_batch(
            "events",
            vec![json!({"kind": "login"}), json!({"kind": "login"}), json!({"kind": "logout"})],
            &ctx,
        )
        .await
        .unwrap();
    let counted = platform
        .execute_raw_query(&QuerySpec::new("events", QueryKind::Count), &ctx)
        .await
        .unwrap();
    assert_eq!(counted.payload, Some(json!({"count": 3})));

    platform
        .execute_operation("register_user", params(json!({"email": "ada@example.com", "name": "Ada"})), &ctx)
        .await
        .unwrap();

    let metrics = platform.get_metrics();
    assert!(metrics.operations.total_calls() > 0);
    assert!(metrics.operations.get("vector_search", Some(TechnologyType::Vector)).is_some());
    assert!(platform.render_prometheus().contains("persistence_query_count_total"));
    assert_eq!(platform.get_health_status().status, polystore_core::HealthState::Healthy);

    platform.stop().await;
    assert!(!platform.is_running());
}

#[tokio::test]
async fn batch_results_stand_alone_and_keep_order() {
    let harness = PlatformHarness::start_quiet().await;
    let ctx = test_context();
    harness
        .platform
        .insert("accounts", json!({"id": "a1"}), &ctx)
        .await
        .unwrap();

    let results = harness
        .platform
        .execute_batch(
            vec![
                QuerySpec::select("accounts"),
                QuerySpec::select("nowhere"),
                QuerySpec::new("events", QueryKind::Count),
            ],
            &ctx,
        )
        .await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().count, 1);
    assert_eq!(results[1].as_ref().unwrap_err().kind(), "routing");
    assert!(results[2].is_ok());
}
