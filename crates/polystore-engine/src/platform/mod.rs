//! The persistence platform: one facade over routing, caching, execution,
//! transactions and provider health.
//!
//! Every public call takes an [`ExecutionContext`]. Calls whose context has
//! no deadline get the configured default, and each call runs inside the
//! context's tracing span.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use polystore_cache::CacheLayer;
use polystore_config::PlatformConfig;
use polystore_core::{
    ExecutionContext, HookChain, ObservabilityHook, PersistenceError, PersistenceResult,
    ProviderFactory,
};
use polystore_registry::ProviderRegistry;
use polystore_telemetry::MetricsRecorder;
use tracing::{info, warn};

use crate::coordinator::TransactionCoordinator;
use crate::executor::Executor;
use crate::remediation::RemediationJournal;
use crate::router::Router;

mod admin;
mod queries;
mod writes;


pub use admin::{PlatformHealth, PlatformInfo, PlatformLimits, PlatformMetrics, TechnologyInfo};

/// The persistence platform.
pub struct PersistencePlatform {
    /// Parsed configuration.
    pub(super) config: Arc<PlatformConfig>,
    /// Provider instances and their health.
    pub(super) registry: Arc<ProviderRegistry>,
    /// Result cache.
    pub(super) cache: Arc<CacheLayer>,
    /// Technology selection and planning.
    pub(super) router: Arc<Router>,
    /// Plan execution.
    pub(super) executor: Arc<Executor>,
    /// Multi-step operations.
    pub(super) coordinator: TransactionCoordinator,
    /// Built-in metrics hook.
    pub(super) metrics: Arc<MetricsRecorder>,
    /// Whether `start` has run.
    pub(super) running: AtomicBool,
}

impl std::fmt::Debug for PersistencePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistencePlatform")
            .field("providers", &self.registry.names())
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Assembles a [`PersistencePlatform`].
pub struct PlatformBuilder {
    config: PlatformConfig,
    factories: Vec<Arc<dyn ProviderFactory>>,
    hooks: Vec<Arc<dyn ObservabilityHook>>,
}

impl PlatformBuilder {
    /// Builder over `config`.
    #[must_use]
    pub fn new(config: PlatformConfig) -> Self {
        Self {
            config,
            factories: Vec::new(),
            hooks: Vec::new(),
        }
    }

    /// Register a provider factory.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.factories.push(factory);
        self
    }

    /// Register several provider factories.
    #[must_use]
    pub fn with_factories(
        mut self,
        factories: impl IntoIterator<Item = Arc<dyn ProviderFactory>>,
    ) -> Self {
        self.factories.extend(factories);
        self
    }

    /// Add an observability hook. The built-in metrics recorder always runs
    /// first.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn ObservabilityHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Validate the configuration and wire the components. Providers are not
    /// connected until [`PersistencePlatform::start`].
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Configuration`] if the configuration is
    /// invalid.
    pub fn build(self) -> PersistenceResult<PersistencePlatform> {
        self.config
            .validate()
            .map_err(|e| PersistenceError::Configuration(e.to_string()))?;
        let config = Arc::new(self.config);

        let registry = Arc::new(
            ProviderRegistry::new(config.registry.clone()).with_factories(self.factories),
        );
        let cache = Arc::new(CacheLayer::new(config.cache.clone()));
        let metrics = Arc::new(MetricsRecorder::new());
        let hooks = self.hooks.into_iter().fold(
            HookChain::new().with(Arc::clone(&metrics) as Arc<dyn ObservabilityHook>),
            HookChain::with,
        );

        let router = Arc::new(Router::new(Arc::clone(&config), Arc::clone(&registry)));
        let executor = Arc::new(Executor::new(
            Arc::clone(&registry),
            Arc::clone(&cache),
            Arc::new(hooks),
            &config.executor,
        ));
        let coordinator = TransactionCoordinator::new(
            Arc::clone(&router),
            Arc::clone(&executor),
            Arc::new(RemediationJournal::new()),
        );

        Ok(PersistencePlatform {
            config,
            registry,
            cache,
            router,
            executor,
            coordinator,
            metrics,
            running: AtomicBool::new(false),
        })
    }
}

impl PersistencePlatform {
    /// Start building a platform over `config`.
    #[must_use]
    pub fn builder(config: PlatformConfig) -> PlatformBuilder {
        PlatformBuilder::new(config)
    }

    /// Connect every configured provider and start the background loops.
    ///
    /// A provider that fails to connect is recorded and skipped; routing falls
    /// back around it.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Configuration`] if a provider's technology
    /// has no registered factory or the factory rejects its configuration.
    pub async fn start(&self) -> PersistenceResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut connected = 0_usize;
        for provider in &self.config.providers {
            match self.registry.register(provider.clone()).await {
                Ok(_) => connected = connected.saturating_add(1),
                Err(e @ PersistenceError::Configuration(_)) => {
                    self.running.store(false, Ordering::SeqCst);
                    return Err(e);
                },
                Err(e) => warn!(
                    provider = %provider.name,
                    technology = %provider.technology,
                    error = %e,
                    "Provider failed to connect; continuing without it"
                ),
            }
        }
        self.registry.start();
        self.cache.start();
        info!(
            configured = self.config.providers.len(),
            connected,
            tables = self.config.tables.len(),
            "Persistence platform started"
        );
        Ok(())
    }

    /// Stop the background loops and shut every provider down.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cache.stop().await;
        self.registry.stop().await;
        self.registry.shutdown_all().await;
        info!("Persistence platform stopped");
    }

    /// Whether `start` has run and `stop` has not.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Context for one platform call: names the operation and applies the
    /// default deadline if the caller set none.
    pub(super) fn prepare(&self, ctx: &ExecutionContext, operation: &str) -> ExecutionContext {
        let mut prepared = ctx.clone();
        if prepared.operation.is_none() {
            prepared.operation = Some(operation.to_owned());
        }
        if prepared.deadline.is_none()
            && let Some(timeout) = self.config.executor.default_timeout()
        {
            prepared = prepared.with_timeout(timeout);
        }
        prepared
    }

    /// Parsed configuration.
    #[must_use]
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Provider registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Router.
    #[must_use]
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Executor.
    #[must_use]
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Cache layer.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    /// Built-in metrics recorder.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }
}
