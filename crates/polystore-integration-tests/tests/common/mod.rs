//! Shared harness for integration tests.

use std::sync::Arc;
use std::time::Duration;

use polystore_config::PlatformConfig;
use polystore_core::{ObservabilityHook, ProviderFactory, TechnologyType};
use polystore_engine::PersistencePlatform;
use polystore_registry::ProbeOutcome;
use polystore_test::{MockFactory, MockProvider, RecordingHook, test_config};
use serde_json::{Map, Value};

/// A started platform over mock providers.
///
/// Every configured provider is a [`MockProvider`] reachable by name, so
/// tests can count calls and inject failures after startup.
#[allow(dead_code)]
pub struct PlatformHarness {
    /// The platform under test.
    pub platform: PersistencePlatform,
    /// One mock factory per technology.
    pub factories: Vec<Arc<MockFactory>>,
    /// Receives every operation event.
    pub hook: Arc<RecordingHook>,
}

#[allow(dead_code)]
impl PlatformHarness {
    /// Start a platform over the shared fixture configuration.
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    /// Start a platform with the background health loop effectively disabled,
    /// so only explicit probes move provider health.
    pub async fn start_quiet() -> Self {
        let mut config = test_config();
        config.registry.health_interval_secs = 3600;
        Self::start_with(config).await
    }

    /// Start a platform over `config`.
    pub async fn start_with(config: PlatformConfig) -> Self {
        Self::start_staged(config, MockFactory::all()).await
    }

    /// Start a platform over `config` using pre-built factories, for tests
    /// that stage providers before they connect.
    pub async fn start_staged(config: PlatformConfig, factories: Vec<Arc<MockFactory>>) -> Self {
        let hook = Arc::new(RecordingHook::new());
        let platform = PersistencePlatform::builder(config)
            .with_factories(
                factories
                    .iter()
                    .map(|f| Arc::clone(f) as Arc<dyn ProviderFactory>),
            )
            .with_hook(Arc::clone(&hook) as Arc<dyn ObservabilityHook>)
            .build()
            .unwrap();
        platform.start().await.unwrap();
        Self {
            platform,
            factories,
            hook,
        }
    }

    /// The mock provider registered as `name`.
    pub fn provider(&self, name: &str) -> Arc<MockProvider> {
        self.factories
            .iter()
            .find_map(|f| f.provider(name))
            .unwrap_or_else(|| panic!("no mock provider named '{name}'"))
    }

    /// The mock factory for `technology`.
    pub fn factory(&self, technology: TechnologyType) -> Arc<MockFactory> {
        self.factories
            .iter()
            .find(|f| f.technology() == technology)
            .cloned()
            .unwrap()
    }

    /// Drive `name` to unroutable with explicit failed probes.
    pub async fn take_down(&self, name: &str) {
        self.provider(name).set_down(true);
        let threshold = self.platform.config().registry.failure_threshold;
        for _ in 0..threshold {
            self.platform.registry().check(name).await;
        }
        assert!(self.platform.registry().get(name).is_none());
    }

    /// Bring `name` back. The first probe after an outage fails because the
    /// connection was dropped; the reconnect it triggers lets a later probe
    /// succeed.
    pub async fn bring_up(&self, name: &str) {
        self.provider(name).set_down(false);
        for _ in 0..5 {
            if self.platform.registry().check(name).await == Some(ProbeOutcome::Healthy) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        assert!(self.platform.registry().get(name).is_some());
    }
}

/// Turn a JSON object literal into call parameters.
#[allow(dead_code)]
pub fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
