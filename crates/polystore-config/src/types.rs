//! Configuration types for the polystore router.
//!
//! Every section implements [`Default`] with production defaults so that an
//! empty `[section]` header in TOML produces a working configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use polystore_core::{
    CachePolicy, CacheStrategy, OrderBy, ProviderConfig, QueryKind, RetryPolicy, TechnologyType,
    TransactionStep,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Top-level PlatformConfig
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Provider instances, one per technology deployment.
    pub providers: Vec<ProviderConfig>,
    /// Per-table technology assignment and cache defaults.
    pub tables: BTreeMap<String, TableConfig>,
    /// Named queries.
    pub queries: BTreeMap<String, NamedQueryConfig>,
    /// Named multi-step operations.
    pub operations: BTreeMap<String, OperationConfig>,
    /// Cache layer settings.
    pub cache: CacheSection,
    /// Registry and health-check settings.
    pub registry: RegistrySection,
    /// Executor limits.
    pub executor: ExecutorSection,
    /// Logging level, format and directives.
    pub logging: LoggingSection,
}

impl PlatformConfig {
    /// Provider configured for `technology`, first declared wins.
    #[must_use]
    pub fn provider_for(&self, technology: TechnologyType) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.technology == technology)
    }

    /// Technologies with at least one configured provider, in declaration
    /// order.
    #[must_use]
    pub fn configured_technologies(&self) -> Vec<TechnologyType> {
        let mut out = Vec::new();
        for p in &self.providers {
            if !out.contains(&p.technology) {
                out.push(p.technology);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// TableConfig
// ---------------------------------------------------------------------------

fn default_table_ttl() -> u64 {
    300
}

/// Where a table lives and how its reads are cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Primary technology.
    pub primary: TechnologyType,
    /// Fallbacks tried in declared order when the primary is unhealthy.
    #[serde(default)]
    pub fallbacks: Vec<TechnologyType>,
    /// Default cache strategy for reads against this table.
    #[serde(default)]
    pub cache: CacheStrategy,
    /// Default cache TTL in seconds.
    #[serde(default = "default_table_ttl")]
    pub ttl_secs: u64,
    /// Tags attached to cached entries.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TableConfig {
    /// Table on `primary` with no fallbacks and no caching.
    #[must_use]
    pub fn new(primary: TechnologyType) -> Self {
        Self {
            primary,
            fallbacks: Vec::new(),
            cache: CacheStrategy::None,
            ttl_secs: default_table_ttl(),
            tags: Vec::new(),
        }
    }

    /// Add fallbacks.
    #[must_use]
    pub fn with_fallbacks(mut self, fallbacks: Vec<TechnologyType>) -> Self {
        self.fallbacks = fallbacks;
        self
    }

    /// Set the cache strategy and TTL.
    #[must_use]
    pub fn cached(mut self, strategy: CacheStrategy, ttl_secs: u64) -> Self {
        self.cache = strategy;
        self.ttl_secs = ttl_secs;
        self
    }

    /// Primary followed by fallbacks.
    #[must_use]
    pub fn candidates(&self) -> Vec<TechnologyType> {
        std::iter::once(self.primary)
            .chain(self.fallbacks.iter().copied())
            .collect()
    }

    /// Default cache policy for the table.
    #[must_use]
    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy::new(self.cache, Duration::from_secs(self.ttl_secs))
            .with_tags(self.tags.clone())
    }
}

// ---------------------------------------------------------------------------
// NamedQueryConfig
// ---------------------------------------------------------------------------

fn default_query_kind() -> QueryKind {
    QueryKind::Select
}

/// A predeclared query callers invoke by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedQueryConfig {
    /// Target table.
    pub table: String,
    /// Operation kind.
    #[serde(default = "default_query_kind")]
    pub kind: QueryKind,
    /// Filter template; `${params.*}` placeholders are filled from the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    /// Parameter defaults, overridden by call parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Row cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Sort order.
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Cache strategy override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStrategy>,
    /// TTL override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    /// Extra cache tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NamedQueryConfig {
    /// Cache policy for this query, layered over the table default.
    #[must_use]
    pub fn cache_policy(&self, table: &TableConfig) -> CachePolicy {
        let base = table.cache_policy();
        let mut tags = base.tags;
        tags.extend(self.tags.iter().cloned());
        CachePolicy::new(
            self.cache.unwrap_or(base.strategy),
            self.ttl_secs.map_or(base.ttl, Duration::from_secs),
        )
        .with_tags(tags)
    }
}

// ---------------------------------------------------------------------------
// OperationConfig
// ---------------------------------------------------------------------------

/// A named multi-step operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationConfig {
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Steps in execution order.
    pub steps: Vec<TransactionStep>,
}

// ---------------------------------------------------------------------------
// CacheSection
// ---------------------------------------------------------------------------

/// Cache layer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Master switch. When off every strategy behaves as `none`.
    pub enabled: bool,
    /// TTL for `cache_set` calls that do not give one.
    pub default_ttl_secs: u64,
    /// Entry cap. The oldest-expiring entries are evicted first.
    pub max_entries: usize,
    /// Refresh-ahead: entries expiring within this window are refreshed.
    pub refresh_window_secs: u64,
    /// Refresh-ahead: how often the refresher wakes up.
    pub refresh_interval_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 300,
            max_entries: 10_000,
            refresh_window_secs: 30,
            refresh_interval_secs: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// RegistrySection
// ---------------------------------------------------------------------------

/// Provider registry and health-check settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Interval between health-check rounds.
    pub health_interval_secs: u64,
    /// Per-provider probe timeout.
    pub probe_timeout_ms: u64,
    /// Consecutive failed probes before a provider is unroutable.
    pub failure_threshold: u32,
    /// Reconnection attempts before a provider is marked failed. Also the
    /// executor's retry budget for connection errors.
    pub max_retries: u32,
    /// First backoff delay.
    pub backoff_initial_ms: u64,
    /// Backoff cap.
    pub backoff_max_ms: u64,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            health_interval_secs: 30,
            probe_timeout_ms: 2_000,
            failure_threshold: 3,
            max_retries: 3,
            backoff_initial_ms: 100,
            backoff_max_ms: 5_000,
        }
    }
}

impl RegistrySection {
    /// Health-check interval.
    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    /// Probe timeout.
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Backoff policy shared by reconnection and executor retries.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

// ---------------------------------------------------------------------------
// ExecutorSection
// ---------------------------------------------------------------------------

/// Executor limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Concurrency bound for batch execution.
    pub max_in_flight: usize,
    /// Deadline applied to calls whose context has none. Zero disables it.
    pub default_timeout_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            default_timeout_ms: 30_000,
        }
    }
}

impl ExecutorSection {
    /// Default deadline, if enabled.
    #[must_use]
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Output format: `pretty`, `compact`, `json` or `full`.
    pub format: String,
    /// Per-crate directives (e.g. `["polystore_registry=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_query_overrides_table_policy() {
        let table = TableConfig::new(TechnologyType::Relational)
            .cached(CacheStrategy::ReadThrough, 60);
        let query = NamedQueryConfig {
            table: "users".into(),
            kind: QueryKind::Select,
            filter: None,
            parameters: Map::new(),
            limit: None,
            order_by: Vec::new(),
            cache: Some(CacheStrategy::RefreshAhead),
            ttl_secs: None,
            tags: vec!["profile".into()],
        };
        let policy = query.cache_policy(&table);
        assert_eq!(policy.strategy, CacheStrategy::RefreshAhead);
        assert_eq!(policy.ttl, Duration::from_secs(60));
        assert_eq!(policy.tags, vec!["profile".to_owned()]);
    }

    #[test]
    fn candidates_put_primary_first() {
        let table = TableConfig::new(TechnologyType::Relational)
            .with_fallbacks(vec![TechnologyType::Document, TechnologyType::Cache]);
        assert_eq!(
            table.candidates(),
            vec![
                TechnologyType::Relational,
                TechnologyType::Document,
                TechnologyType::Cache
            ]
        );
    }

    #[test]
    fn zero_timeout_disables_default_deadline() {
        let exec = ExecutorSection {
            default_timeout_ms: 0,
            ..ExecutorSection::default()
        };
        assert!(exec.default_timeout().is_none());
    }
}
