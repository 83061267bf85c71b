//! Provider registration, lookup and removal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use polystore_config::RegistrySection;
use polystore_core::{
    HealthRecord, PersistenceError, PersistenceResult, Provider, ProviderConfig, ProviderFactory,
    RetryPolicy, TechnologyType,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One registered provider and its health.
pub(crate) struct ProviderSlot {
    pub(crate) provider: Arc<dyn Provider>,
    pub(crate) config: ProviderConfig,
    pub(crate) seq: u64,
    pub(crate) registered_at: DateTime<Utc>,
    /// Read by routing on every call; written only under `probe`.
    pub(crate) health: RwLock<HealthRecord>,
    /// Serializes probes and reconnections for this provider.
    pub(crate) probe: Mutex<()>,
}

impl ProviderSlot {
    pub(crate) fn health(&self) -> HealthRecord {
        self.health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn update_health<T>(&self, f: impl FnOnce(&mut HealthRecord) -> T) -> T {
        f(&mut self.health.write().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A registration whose initialization failed. Kept for diagnostics; the
/// provider is not routable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRegistration {
    /// Provider name.
    pub name: String,
    /// Technology.
    pub technology: TechnologyType,
    /// Why it failed.
    pub error: String,
    /// When.
    pub at: DateTime<Utc>,
}

/// Health of one registered provider, as reported to callers.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    /// Provider name.
    pub name: String,
    /// Technology.
    pub technology: TechnologyType,
    /// Whether routing may use it.
    pub routable: bool,
    /// When it was registered.
    pub registered_at: DateTime<Utc>,
    /// Health record.
    #[serde(flatten)]
    pub health: HealthRecord,
}

/// Owns provider instances and their health.
///
/// Factories are keyed by technology. At most one live provider exists per
/// name; re-registering a name shuts the old instance down before the new one
/// is installed. Lookups for routing return only providers whose health
/// record is routable, though unhealthy instances stay registered so the
/// health loop can reconnect them.
pub struct ProviderRegistry {
    pub(crate) settings: RegistrySection,
    pub(crate) retry: RetryPolicy,
    factories: DashMap<TechnologyType, Arc<dyn ProviderFactory>>,
    pub(crate) providers: DashMap<String, Arc<ProviderSlot>>,
    failed: DashMap<String, FailedRegistration>,
    next_seq: AtomicU64,
    started_at: std::time::Instant,
    pub(crate) loop_handle: std::sync::Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.len())
            .field("factories", &self.factories.len())
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(settings: RegistrySection) -> Self {
        Self {
            retry: settings.retry_policy(),
            settings,
            factories: DashMap::new(),
            providers: DashMap::new(),
            failed: DashMap::new(),
            next_seq: AtomicU64::new(0),
            started_at: std::time::Instant::now(),
            loop_handle: std::sync::Mutex::new(None),
        }
    }

    /// Install a factory, replacing any previous one for its technology.
    pub fn register_factory(&self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.technology(), factory);
    }

    /// Builder form of [`ProviderRegistry::register_factory`].
    #[must_use]
    pub fn with_factories(self, factories: impl IntoIterator<Item = Arc<dyn ProviderFactory>>) -> Self {
        for factory in factories {
            self.register_factory(factory);
        }
        self
    }

    /// Technologies with a registered factory, in a stable order.
    #[must_use]
    pub fn supported_technologies(&self) -> Vec<TechnologyType> {
        let mut techs: Vec<_> = self.factories.iter().map(|f| *f.key()).collect();
        techs.sort();
        techs
    }

    /// Time since the registry was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Create, initialize and install a provider.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Configuration`] if no factory is registered for
    ///   the technology or the factory rejects the configuration.
    /// - [`PersistenceError::Connection`] if initialization fails or exceeds
    ///   the connect timeout. The attempt is recorded in
    ///   [`ProviderRegistry::failed_registrations`] and nothing is installed.
    pub async fn register(&self, config: ProviderConfig) -> PersistenceResult<Arc<dyn Provider>> {
        let technology = config.technology;
        let factory = self
            .factories
            .get(&technology)
            .map(|f| Arc::clone(f.value()))
            .ok_or_else(|| {
                PersistenceError::Configuration(format!(
                    "no factory registered for technology '{technology}' (provider '{}')",
                    config.name
                ))
            })?;
        let provider = factory.create(&config)?;

        let connect_timeout = Duration::from_millis(config.connect_timeout_ms);
        let init = match tokio::time::timeout(connect_timeout, provider.initialize()).await {
            Ok(result) => result,
            Err(_) => Err(PersistenceError::connection(
                &config.name,
                technology,
                format!("initialize timed out after {}ms", config.connect_timeout_ms),
            )),
        };
        if let Err(e) = init {
            let error = match e {
                PersistenceError::Connection { .. } => e,
                other => PersistenceError::connection(&config.name, technology, other.to_string()),
            };
            warn!(provider = %config.name, technology = %technology, error = %error, "Provider registration failed");
            self.failed.insert(
                config.name.clone(),
                FailedRegistration {
                    name: config.name.clone(),
                    technology,
                    error: error.to_string(),
                    at: Utc::now(),
                },
            );
            // Best effort: the instance never became live.
            let _ = provider.shutdown().await;
            return Err(error);
        }

        if let Some((_, old)) = self.providers.remove(&config.name) {
            if let Err(e) = old.provider.shutdown().await {
                warn!(provider = %config.name, error = %e, "Shutdown of replaced provider failed");
            }
            info!(provider = %config.name, "Replaced existing provider");
        }

        let slot = Arc::new(ProviderSlot {
            provider: Arc::clone(&provider),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            registered_at: Utc::now(),
            health: RwLock::new(HealthRecord::new()),
            probe: Mutex::new(()),
            config,
        });
        self.failed.remove(&slot.config.name);
        info!(
            provider = %slot.config.name,
            technology = %technology,
            "Provider registered"
        );
        self.providers.insert(slot.config.name.clone(), slot);
        Ok(provider)
    }

    /// The provider named `name` if it is routable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        let slot = self.providers.get(name)?;
        slot.health()
            .is_routable(self.settings.failure_threshold)
            .then(|| Arc::clone(&slot.provider))
    }

    /// The provider named `name` regardless of health.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).map(|s| Arc::clone(&s.provider))
    }

    /// First routable provider of `technology`, in registration order.
    #[must_use]
    pub fn healthy_provider_for(&self, technology: TechnologyType) -> Option<Arc<dyn Provider>> {
        self.slots()
            .into_iter()
            .filter(|s| s.config.technology == technology)
            .find(|s| s.health().is_routable(self.settings.failure_threshold))
            .map(|s| Arc::clone(&s.provider))
    }

    /// Whether any routable provider of `technology` exists.
    #[must_use]
    pub fn is_technology_healthy(&self, technology: TechnologyType) -> bool {
        self.healthy_provider_for(technology).is_some()
    }

    /// Shut down and remove `name`. Returns whether it was registered;
    /// removing an unknown name is a no-op.
    pub async fn remove(&self, name: &str) -> bool {
        self.failed.remove(name);
        let Some((_, slot)) = self.providers.remove(name) else {
            return false;
        };
        if let Err(e) = slot.provider.shutdown().await {
            warn!(provider = %name, error = %e, "Provider shutdown failed");
        }
        info!(provider = %name, "Provider removed");
        true
    }

    /// Shut down and remove every provider.
    pub async fn shutdown_all(&self) {
        let names: Vec<String> = self.providers.iter().map(|s| s.key().clone()).collect();
        for name in names {
            self.remove(&name).await;
        }
    }

    /// Current health record of `name`.
    #[must_use]
    pub fn health(&self, name: &str) -> Option<HealthRecord> {
        self.providers.get(name).map(|s| s.health())
    }

    /// Status of every provider, in registration order.
    #[must_use]
    pub fn statuses(&self) -> Vec<ProviderStatus> {
        let threshold = self.settings.failure_threshold;
        self.slots()
            .into_iter()
            .map(|s| {
                let health = s.health();
                ProviderStatus {
                    name: s.config.name.clone(),
                    technology: s.config.technology,
                    routable: health.is_routable(threshold),
                    registered_at: s.registered_at,
                    health,
                }
            })
            .collect()
    }

    /// Registrations whose initialization failed.
    #[must_use]
    pub fn failed_registrations(&self) -> Vec<FailedRegistration> {
        let mut out: Vec<_> = self.failed.iter().map(|f| f.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Names of registered providers, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.slots().into_iter().map(|s| s.config.name.clone()).collect()
    }

    /// Backoff policy shared with the executor.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Slots sorted by registration order. The snapshot is taken without
    /// holding map guards across the caller's work.
    pub(crate) fn slots(&self) -> Vec<Arc<ProviderSlot>> {
        let mut slots: Vec<_> = self.providers.iter().map(|s| Arc::clone(s.value())).collect();
        slots.sort_by_key(|s| s.seq);
        slots
    }
}
