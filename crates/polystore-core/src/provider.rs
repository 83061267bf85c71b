//! The storage adapter contract.
//!
//! Routing, caching, execution and transaction coordination only ever call
//! through [`Provider`]. Technology-specific behaviour lives behind it and is
//! described to the router through declared capability sets.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::{PersistenceError, PersistenceResult};
use crate::query::QuerySpec;
use crate::record::Record;
use crate::technology::{DataType, Feature, QueryKind, TechnologyType};

/// Lazy, incrementally consumed result of [`Provider::query`].
pub type RecordStream = BoxStream<'static, PersistenceResult<Record>>;

/// Handle to a native transaction opened by [`Provider::begin_transaction`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionHandle {
    /// Provider-scoped transaction id.
    pub id: String,
    /// Provider that owns the transaction.
    pub provider: String,
}

/// Column definition for [`Provider::create_table`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Field name.
    pub name: String,
    /// Stored type.
    pub data_type: DataType,
    /// Whether inserts must supply it.
    #[serde(default)]
    pub required: bool,
    /// Whether to build a secondary index.
    #[serde(default)]
    pub indexed: bool,
}

/// Table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Field definitions.
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
}

impl TableSchema {
    /// Schema with no declared fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, data_type: DataType, required: bool) -> Self {
        self.fields.push(FieldSchema {
            name: name.into(),
            data_type,
            required,
            indexed: false,
        });
        self
    }

    /// Names of required fields missing from `record`.
    #[must_use]
    pub fn missing_required(&self, record: &Record) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required && f.name != "id" && !record.data.contains_key(&f.name))
            .map(|f| f.name.as_str())
            .collect()
    }
}

/// Result of a liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderHealth {
    /// Whether the provider answered correctly.
    pub healthy: bool,
    /// Probe round-trip in milliseconds.
    pub latency_ms: u64,
    /// Diagnostic message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProviderHealth {
    /// Healthy probe result.
    #[must_use]
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            healthy: true,
            latency_ms,
            message: None,
        }
    }

    /// Unhealthy probe result.
    #[must_use]
    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            latency_ms: 0,
            message: Some(message.into()),
        }
    }
}

/// Counters an adapter keeps about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    /// Operations served.
    pub operations: u64,
    /// Operations that failed.
    pub failures: u64,
    /// Records returned by reads.
    pub records_read: u64,
    /// Records inserted, updated or deleted.
    pub records_written: u64,
    /// Native transactions currently open.
    pub active_transactions: u64,
}

/// Database credentials. `Debug` never prints the password.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name.
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection pool limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections kept open when idle.
    pub min_connections: u32,
    /// Upper bound on open connections.
    pub max_connections: u32,
    /// Idle connections older than this are closed.
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            idle_timeout_secs: 300,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

/// Connection and behaviour settings for one provider instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Instance name, unique in the registry.
    pub name: String,
    /// Technology class.
    pub technology: TechnologyType,
    /// Endpoints.
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Credentials, if the store requires them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Pool limits.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Feature flags by snake-case feature name. Absent means the adapter's
    /// default.
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    /// Adapter-specific options.
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Connect timeout.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl ProviderConfig {
    /// Minimal configuration for `name` of the given technology.
    #[must_use]
    pub fn new(name: impl Into<String>, technology: TechnologyType) -> Self {
        Self {
            name: name.into(),
            technology,
            hosts: Vec::new(),
            credentials: None,
            pool: PoolConfig::default(),
            features: BTreeMap::new(),
            options: Map::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    /// Add an endpoint.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }

    /// Set a feature flag.
    #[must_use]
    pub fn with_feature(mut self, feature: Feature, enabled: bool) -> Self {
        self.features.insert(feature.as_str().to_owned(), enabled);
        self
    }

    /// Set an adapter option.
    #[must_use]
    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Explicit flag for `feature`, if configured.
    #[must_use]
    pub fn feature_flag(&self, feature: Feature) -> Option<bool> {
        self.features.get(feature.as_str()).copied()
    }
}

/// The fixed capability interface every storage adapter implements.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Instance name.
    fn name(&self) -> &str;

    /// Technology class.
    fn technology(&self) -> TechnologyType;

    /// Open connections. Called once by the registry before the provider is
    /// made routable, and again on reconnection after [`Provider::shutdown`].
    async fn initialize(&self) -> PersistenceResult<()>;

    /// Close connections. Must be idempotent.
    async fn shutdown(&self) -> PersistenceResult<()>;

    /// Cheap round-trip used by the health loop.
    async fn test_connection(&self) -> PersistenceResult<()>;

    /// Detailed health snapshot.
    async fn health_status(&self) -> ProviderHealth;

    /// Create a table or collection.
    async fn create_table(&self, table: &str, schema: &TableSchema) -> PersistenceResult<()>;

    /// Drop a table or collection. Dropping a missing table is not an error.
    async fn drop_table(&self, table: &str) -> PersistenceResult<()>;

    /// Whether the table exists.
    async fn table_exists(&self, table: &str) -> PersistenceResult<bool>;

    /// Insert one record and return it as stored.
    async fn insert(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        record: Record,
    ) -> PersistenceResult<Record>;

    /// Insert many records. The default inserts one at a time.
    async fn insert_batch(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        records: Vec<Record>,
    ) -> PersistenceResult<Vec<Record>> {
        let mut stored = Vec::with_capacity(records.len());
        for record in records {
            stored.push(self.insert(ctx, table, record).await?);
        }
        Ok(stored)
    }

    /// Merge `patch` into the record with `id` and return the new version.
    async fn update(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> PersistenceResult<Record>;

    /// Delete the record with `id`. Returns whether it existed.
    async fn delete(&self, ctx: &ExecutionContext, table: &str, id: &str)
    -> PersistenceResult<bool>;

    /// Evaluate a read. The stream is produced afresh on every call.
    async fn query(&self, ctx: &ExecutionContext, spec: &QuerySpec)
    -> PersistenceResult<RecordStream>;

    /// Open a native transaction.
    async fn begin_transaction(
        &self,
        _ctx: &ExecutionContext,
    ) -> PersistenceResult<TransactionHandle> {
        Err(PersistenceError::validation(
            self.name(),
            "begin_transaction",
            format!("{} provider has no native transactions", self.technology()),
        ))
    }

    /// Commit a native transaction.
    async fn commit(&self, _handle: &TransactionHandle) -> PersistenceResult<()> {
        Err(PersistenceError::validation(
            self.name(),
            "commit",
            format!("{} provider has no native transactions", self.technology()),
        ))
    }

    /// Roll back a native transaction.
    async fn rollback(&self, _handle: &TransactionHandle) -> PersistenceResult<()> {
        Err(PersistenceError::validation(
            self.name(),
            "rollback",
            format!("{} provider has no native transactions", self.technology()),
        ))
    }

    /// Technology-specific escape hatch (vector search, traversal, ...).
    async fn execute_specific_operation(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        operation: &str,
        params: &Value,
    ) -> PersistenceResult<Value>;

    /// Operation kinds this provider accepts.
    fn supported_query_types(&self) -> HashSet<QueryKind>;

    /// Data types this provider stores natively.
    fn supported_data_types(&self) -> HashSet<DataType>;

    /// Whether an optional feature is available.
    fn supports_feature(&self, feature: Feature) -> bool;

    /// Whether native begin/commit/rollback are available.
    fn supports_transactions(&self) -> bool {
        self.supports_feature(Feature::Transactions)
    }

    /// Adapter-side counters.
    fn metrics(&self) -> ProviderMetrics {
        ProviderMetrics::default()
    }
}

/// Constructs adapters of one technology.
pub trait ProviderFactory: Send + Sync {
    /// Technology this factory builds.
    fn technology(&self) -> TechnologyType;

    /// Build an uninitialised adapter from `config`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is unusable.
    fn create(&self, config: &ProviderConfig) -> PersistenceResult<Arc<dyn Provider>>;
}
