//! Shared setup for the engine's unit tests.

use std::sync::Arc;

use polystore_config::PlatformConfig;
use polystore_core::ProviderFactory;
use polystore_registry::ProviderRegistry;
use polystore_test::MockFactory;

/// Registry with a mock factory per technology and every configured
/// provider registered.
pub(crate) async fn registry_for(
    config: &PlatformConfig,
) -> (Arc<ProviderRegistry>, Vec<Arc<MockFactory>>) {
    let factories = MockFactory::all();
    let registry = ProviderRegistry::new(config.registry.clone()).with_factories(
        factories
            .iter()
            .map(|f| Arc::clone(f) as Arc<dyn ProviderFactory>),
    );
    for provider in &config.providers {
        registry.register(provider.clone()).await.unwrap();
    }
    (Arc::new(registry), factories)
}

/// The mock behind provider `name`.
pub(crate) fn mock(
    factories: &[Arc<MockFactory>],
    name: &str,
) -> Arc<polystore_test::MockProvider> {
    factories
        .iter()
        .find_map(|f| f.provider(name))
        .unwrap()
}
