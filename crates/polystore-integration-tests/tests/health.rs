//! Integration tests for provider health tracking.
//!
//! A provider leaves rotation after `failure_threshold` consecutive failed
//! probes and returns after the next successful one.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::PlatformHarness;
use polystore_config::RegistrySection;
use polystore_core::{
    HealthState, Provider, ProviderConfig, ProviderFactory, QuerySpec, TechnologyType,
};
use polystore_registry::{ProbeOutcome, ProviderRegistry};
use polystore_test::{MockFactory, MockProvider, test_config, test_context};

async fn registry_with(mock: Arc<MockProvider>) -> ProviderRegistry {
    let factory = Arc::new(MockFactory::new(TechnologyType::Relational));
    factory.stage(mock);
    let registry = ProviderRegistry::new(test_config().registry)
        .with_factories([factory as Arc<dyn ProviderFactory>]);
    registry
        .register(ProviderConfig::new("pg", TechnologyType::Relational))
        .await
        .unwrap();
    registry
}

#[tokio::test(start_paused = true)]
async fn three_failed_probes_evict_and_one_success_restores() {
    let mock = Arc::new(MockProvider::new("pg", TechnologyType::Relational));
    let registry = registry_with(Arc::clone(&mock)).await;
    assert!(registry.get("pg").is_some());

    mock.set_down(true);
    for expected in 1..=2_u32 {
        assert_eq!(registry.check("pg").await, Some(ProbeOutcome::Failed));
        let health = registry.health("pg").unwrap();
        assert_eq!(health.consecutive_failures, expected);
        assert_eq!(health.state, HealthState::Degraded);
        assert!(registry.get("pg").is_some(), "still routable below threshold");
    }
    assert_eq!(registry.check("pg").await, Some(ProbeOutcome::Failed));
    assert!(registry.get("pg").is_none());
    assert_eq!(registry.health("pg").unwrap().state, HealthState::Unhealthy);
    // Unroutable is not unregistered.
    assert!(registry.lookup("pg").is_some());

    mock.set_down(false);
    tokio::time::advance(Duration::from_secs(1)).await;
    let mut outcome = registry.check("pg").await;
    if outcome == Some(ProbeOutcome::Failed) {
        // The outage dropped the connection; this probe's reconnect restores it.
        outcome = registry.check("pg").await;
    }
    assert_eq!(outcome, Some(ProbeOutcome::Healthy));
    assert!(registry.get("pg").is_some());
    let health = registry.health("pg").unwrap();
    assert_eq!(health.state, HealthState::Healthy);
    assert_eq!(health.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn the_background_loop_probes_on_its_own() {
    let mock = Arc::new(MockProvider::new("pg", TechnologyType::Relational));
    let mut settings: RegistrySection = test_config().registry;
    settings.health_interval_secs = 1;
    let factory = Arc::new(MockFactory::new(TechnologyType::Relational));
    factory.stage(Arc::clone(&mock));
    let registry = Arc::new(
        ProviderRegistry::new(settings).with_factories([factory as Arc<dyn ProviderFactory>]),
    );
    registry
        .register(ProviderConfig::new("pg", TechnologyType::Relational))
        .await
        .unwrap();

    mock.set_down(true);
    registry.start();
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    assert!(registry.get("pg").is_none());
    assert!(mock.calls("test_connection") >= 3);
    registry.stop().await;
    assert!(!registry.is_running());
}

#[tokio::test]
async fn unhealthy_provider_shows_in_platform_health() {
    let harness = PlatformHarness::start_quiet().await;
    harness.take_down("fts").await;

    let health = harness.platform.get_health_status();
    assert_eq!(health.status, HealthState::Degraded);
    assert_eq!(health.technologies.get(&TechnologyType::Search), Some(&false));
    let fts = health.providers.iter().find(|p| p.name == "fts").unwrap();
    assert!(!fts.routable);
    assert_eq!(fts.health.consecutive_failures, 3);

    let err = harness
        .platform
        .execute_raw_query(&QuerySpec::select("articles"), &test_context())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "routing");

    harness.bring_up("fts").await;
    assert_eq!(harness.platform.get_health_status().status, HealthState::Healthy);
}

#[tokio::test]
async fn exhausted_operational_retries_count_toward_health() {
    let harness = PlatformHarness::start_quiet().await;
    let kv = harness.provider("kv");
    kv.fail_always("query:sessions", kv.connection_error("reset by peer"));

    let err = harness
        .platform
        .execute_raw_query(&QuerySpec::select("sessions"), &test_context())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "provider_unavailable");
    // One call plus three retries.
    assert_eq!(kv.calls("query:sessions"), 4);

    let health = harness.platform.registry().health("kv").unwrap();
    assert_eq!(health.consecutive_failures, 1);
    assert_eq!(health.state, HealthState::Degraded);
    assert_eq!(kv.technology(), TechnologyType::Cache);
}

#[tokio::test]
async fn every_provider_starts_healthy() {
    let harness = PlatformHarness::start_quiet().await;
    let outcomes = harness.platform.registry().check_all().await;
    assert_eq!(outcomes.len(), 8);
    assert!(outcomes.iter().all(|(_, o)| *o == ProbeOutcome::Healthy));
    assert_eq!(harness.platform.get_health_status().status, HealthState::Healthy);
}
