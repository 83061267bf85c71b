//! Integration tests for results merged across technologies: weighted
//! hybrid ranking and id-keyed set operations.

mod common;

use common::PlatformHarness;
use polystore_core::{
    CrossTechnologyQuery, HybridSearchQuery, HybridWeights, QuerySpec, Record, ScoredRecord,
    SetMerge, TechnologyType, TextSearchQuery, TextSearchResponse, VectorMatch,
    VectorSearchQuery, VectorSearchResponse,
};
use polystore_engine::merge;
use polystore_test::{test_context, test_document, test_user};
use serde_json::json;

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn doc(id: &str) -> Record {
    Record::from_value(json!({"id": id}))
}

#[test]
fn weighted_scores_decide_the_ranking() {
    let vector = VectorSearchResponse {
        matches: vec![VectorMatch::new(doc("c1"), 0.9), VectorMatch::new(doc("c2"), 0.4)],
    };
    let text = TextSearchResponse {
        hits: vec![ScoredRecord::new(doc("c2"), 0.9), ScoredRecord::new(doc("c1"), 0.1)],
    };
    let weights = HybridWeights {
        vector: 0.7,
        text: 0.3,
    };

    let ranked = merge::hybrid(&vector, &text, weights, None);
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].record.id, "c1");
    assert_eq!(ranked[1].record.id, "c2");
    assert!(approx(ranked[0].score, 0.66));
    assert!(approx(ranked[1].score, 0.55));
}

#[test]
fn shifting_weight_to_text_flips_the_ranking() {
    let vector = VectorSearchResponse {
        matches: vec![VectorMatch::new(doc("c1"), 0.9), VectorMatch::new(doc("c2"), 0.4)],
    };
    let text = TextSearchResponse {
        hits: vec![ScoredRecord::new(doc("c2"), 0.9), ScoredRecord::new(doc("c1"), 0.1)],
    };
    let weights = HybridWeights {
        vector: 0.3,
        text: 0.7,
    };

    let ranked = merge::hybrid(&vector, &text, weights, Some(1));
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].record.id, "c2");
}

#[tokio::test]
async fn hybrid_search_fans_out_to_vector_and_search_stores() {
    let harness = PlatformHarness::start_quiet().await;
    let ctx = test_context();
    let platform = &harness.platform;
    for (id, embedding) in [("d1", [1.0, 0.0]), ("d2", [0.0, 1.0])] {
        platform
            .insert("docs", test_document(id, "", &embedding).to_flat_value(), &ctx)
            .await
            .unwrap();
    }
    for (id, body) in [("d1", "rust tips"), ("d2", "rust and async rust")] {
        platform
            .insert("articles", json!({"id": id, "body": body}), &ctx)
            .await
            .unwrap();
    }

    let query = HybridSearchQuery::new(
        VectorSearchQuery::new("docs", vec![1.0, 0.0], 2),
        TextSearchQuery::new("articles", "rust", 2),
        HybridWeights::default(),
    );
    let result = platform.hybrid_search(&query, &ctx).await.unwrap();

    assert_eq!(
        result.technologies,
        vec![TechnologyType::Vector, TechnologyType::Search]
    );
    assert_eq!(result.results[0].record.id, "d1");
    assert!(result.results.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(harness.provider("vec").calls("vector_search"), 1);
    assert_eq!(harness.provider("fts").calls("full_text_search"), 1);
}

#[tokio::test]
async fn negative_weights_are_rejected_before_fan_out() {
    let harness = PlatformHarness::start_quiet().await;
    let query = HybridSearchQuery::new(
        VectorSearchQuery::new("docs", vec![1.0, 0.0], 2),
        TextSearchQuery::new("articles", "rust", 2),
        HybridWeights {
            vector: -1.0,
            text: 0.5,
        },
    );
    let err = harness
        .platform
        .hybrid_search(&query, &test_context())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(harness.provider("vec").calls("vector_search"), 0);
}

async fn seed_users_and_profiles(harness: &PlatformHarness) {
    let ctx = test_context();
    for (id, name) in [("u1", "ada"), ("u2", "grace")] {
        harness
            .platform
            .insert("users", test_user(id, name).to_flat_value(), &ctx)
            .await
            .unwrap();
    }
    for id in ["u2", "u3"] {
        harness
            .platform
            .insert("profiles", json!({"id": id, "bio": "hi"}), &ctx)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn cross_technology_union_keeps_the_first_declared_source() {
    let harness = PlatformHarness::start_quiet().await;
    seed_users_and_profiles(&harness).await;

    let query = CrossTechnologyQuery::new(
        vec![QuerySpec::select("users"), QuerySpec::select("profiles")],
        SetMerge::Union,
    );
    let result = harness
        .platform
        .cross_technology_query(&query, &test_context())
        .await
        .unwrap();

    let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["u1", "u2", "u3"]);
    assert_eq!(result.count, 3);
    let u2 = result.records.iter().find(|r| r.id == "u2").unwrap();
    assert_eq!(u2.field("name"), Some(json!("grace")));
    assert!(u2.field("bio").is_none());
}

#[tokio::test]
async fn cross_technology_intersection_keeps_shared_ids() {
    let harness = PlatformHarness::start_quiet().await;
    seed_users_and_profiles(&harness).await;

    let query = CrossTechnologyQuery::new(
        vec![QuerySpec::select("users"), QuerySpec::select("profiles")],
        SetMerge::Intersection,
    );
    let result = harness
        .platform
        .cross_technology_query(&query, &test_context())
        .await
        .unwrap();
    let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["u2"]);
}
