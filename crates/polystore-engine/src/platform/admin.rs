//! Direct cache access, health, metrics and capability reporting.

use std::collections::BTreeMap;
use std::time::Duration;

use polystore_cache::CacheStats;
use polystore_core::{Feature, HealthState, ProviderMetrics, QueryKind, TechnologyType};
use polystore_registry::{FailedRegistration, ProviderStatus};
use polystore_telemetry::MetricsSnapshot;
use serde::Serialize;
use serde_json::Value;

use super::PersistencePlatform;

/// Overall health report.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformHealth {
    /// `healthy` when every provider is, `unhealthy` when no technology has a
    /// routable provider, `degraded` otherwise.
    pub status: HealthState,
    /// Seconds since the registry was created.
    pub uptime_secs: u64,
    /// Every registered provider.
    pub providers: Vec<ProviderStatus>,
    /// Whether each configured technology has a routable provider.
    pub technologies: BTreeMap<TechnologyType, bool>,
    /// Providers that never connected.
    pub failed_registrations: Vec<FailedRegistration>,
}

/// Metrics report.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformMetrics {
    /// Per-operation counters and latency.
    pub operations: MetricsSnapshot,
    /// Cache counters.
    pub cache: CacheStats,
    /// Adapter-side counters by provider name.
    pub providers: BTreeMap<String, ProviderMetrics>,
}

/// Capabilities of one technology as currently served.
#[derive(Debug, Clone, Serialize)]
pub struct TechnologyInfo {
    /// Technology.
    pub technology: TechnologyType,
    /// Registered providers.
    pub providers: Vec<String>,
    /// Operation kinds accepted.
    pub query_kinds: Vec<QueryKind>,
    /// Optional features available.
    pub features: Vec<Feature>,
}

/// Configured limits.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformLimits {
    /// Batch concurrency bound.
    pub max_in_flight: usize,
    /// Default per-call deadline; zero when disabled.
    pub default_timeout_ms: u64,
    /// Cache entry cap.
    pub cache_max_entries: usize,
    /// Retries on transient provider errors.
    pub max_retries: u32,
}

/// What this platform instance offers.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformInfo {
    /// Product name.
    pub name: &'static str,
    /// Crate version.
    pub version: &'static str,
    /// Technologies with a registered factory.
    pub supported_technologies: Vec<TechnologyType>,
    /// Per-technology capabilities of registered providers.
    pub technologies: Vec<TechnologyInfo>,
    /// Limits.
    pub limits: PlatformLimits,
    /// Configured tables.
    pub tables: Vec<String>,
    /// Named queries.
    pub queries: Vec<String>,
    /// Named operations.
    pub operations: Vec<String>,
}

impl PersistencePlatform {
    /// Read a raw cache entry.
    #[must_use]
    pub fn cache_get(&self, key: &str) -> Option<Value> {
        self.cache.get(key)
    }

    /// Store a raw cache entry. Without a TTL the configured default applies.
    /// The key's prefix up to the first `:` is treated as its table, so
    /// invalidating that table drops the entry too.
    pub fn cache_set(&self, key: &str, value: Value, ttl: Option<Duration>, tags: Vec<String>) {
        let table = key.split_once(':').map_or(key, |(table, _)| table);
        let ttl = ttl.unwrap_or_else(|| self.cache.default_ttl());
        self.cache.put(key, table, value, ttl, tags);
    }

    /// Remove a raw cache entry. Returns whether it existed.
    pub fn cache_remove(&self, key: &str) -> bool {
        self.cache.remove(key)
    }

    /// Drop cache entries matching `pattern`: a table name, a tag, or a
    /// key prefix ending in `*`. Returns the number removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        self.cache.invalidate(pattern)
    }

    /// Drop every cache entry.
    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    /// Provider and technology health.
    #[must_use]
    pub fn get_health_status(&self) -> PlatformHealth {
        let providers = self.registry.statuses();
        let failed_registrations = self.registry.failed_registrations();
        let technologies: BTreeMap<TechnologyType, bool> = self
            .config
            .configured_technologies()
            .into_iter()
            .map(|t| (t, self.registry.is_technology_healthy(t)))
            .collect();

        let status = if technologies.values().all(|up| !*up) {
            HealthState::Unhealthy
        } else if failed_registrations.is_empty()
            && providers.iter().all(|p| p.health.state == HealthState::Healthy)
            && technologies.values().all(|up| *up)
        {
            HealthState::Healthy
        } else {
            HealthState::Degraded
        };

        PlatformHealth {
            status,
            uptime_secs: self.registry.uptime().as_secs(),
            providers,
            technologies,
            failed_registrations,
        }
    }

    /// Operation, cache and provider counters.
    #[must_use]
    pub fn get_metrics(&self) -> PlatformMetrics {
        let providers = self
            .registry
            .names()
            .into_iter()
            .filter_map(|name| {
                let provider = self.registry.lookup(&name)?;
                Some((name, provider.metrics()))
            })
            .collect();
        PlatformMetrics {
            operations: self.metrics.snapshot(),
            cache: self.cache.stats(),
            providers,
        }
    }

    /// Operation metrics in Prometheus text format.
    #[must_use]
    pub fn render_prometheus(&self) -> String {
        self.metrics.render_prometheus()
    }

    /// Supported technologies, capabilities, limits and configured names.
    #[must_use]
    pub fn platform_info(&self) -> PlatformInfo {
        let mut by_technology: BTreeMap<TechnologyType, TechnologyInfo> = BTreeMap::new();
        for name in self.registry.names() {
            let Some(provider) = self.registry.lookup(&name) else {
                continue;
            };
            let info = by_technology
                .entry(provider.technology())
                .or_insert_with(|| {
                    let mut query_kinds: Vec<QueryKind> =
                        provider.supported_query_types().into_iter().collect();
                    query_kinds.sort_by_key(|k| k.as_str());
                    let mut features: Vec<Feature> = Feature::ALL
                        .into_iter()
                        .filter(|f| provider.supports_feature(*f))
                        .collect();
                    features.sort_by_key(|f| f.as_str());
                    TechnologyInfo {
                        technology: provider.technology(),
                        providers: Vec::new(),
                        query_kinds,
                        features,
                    }
                });
            info.providers.push(name);
        }

        PlatformInfo {
            name: "polystore",
            version: env!("CARGO_PKG_VERSION"),
            supported_technologies: self.registry.supported_technologies(),
            technologies: by_technology.into_values().collect(),
            limits: PlatformLimits {
                max_in_flight: self.config.executor.max_in_flight,
                default_timeout_ms: self.config.executor.default_timeout_ms,
                cache_max_entries: self.config.cache.max_entries,
                max_retries: self.config.registry.max_retries,
            },
            tables: self.config.tables.keys().cloned().collect(),
            queries: self.config.queries.keys().cloned().collect(),
            operations: self.config.operations.keys().cloned().collect(),
        }
    }
}
