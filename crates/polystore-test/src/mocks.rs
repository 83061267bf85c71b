//! Mock implementations for testing.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use polystore_core::{
    DataType, ExecutionContext, Feature, ObservabilityHook, OperationEvent, PersistenceError,
    PersistenceResult, Provider, ProviderConfig, ProviderFactory, ProviderHealth,
    ProviderMetrics, QueryKind, QuerySpec, Record, RecordStream, TableSchema, TechnologyType,
    TransactionHandle,
};
use polystore_providers::MemoryProvider;
use serde_json::{Map, Value};

#[derive(Debug, Clone)]
struct Injection {
    error: PersistenceError,
    remaining: Option<usize>,
}

/// Instrumented provider for tests.
///
/// Data semantics come from a wrapped [`MemoryProvider`]; on top of that the
/// mock counts calls per operation, injects failures and delays, and can be
/// taken down to simulate an outage.
///
/// Call counters are keyed by operation name (`insert`, `query`,
/// `test_connection`, ...) and by `operation:table` for data calls.
/// Specific operations are counted under their own name.
pub struct MockProvider {
    inner: MemoryProvider,
    calls: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, Injection>>,
    delay: Mutex<Option<Duration>>,
    down: AtomicBool,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("name", &self.inner.name())
            .field("technology", &self.inner.technology())
            .field("down", &self.down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl MockProvider {
    /// Create a mock named `name` of the given technology.
    #[must_use]
    pub fn new(name: impl Into<String>, technology: TechnologyType) -> Self {
        Self::from_config(ProviderConfig::new(name, technology))
    }

    /// Create a mock from a full configuration.
    #[must_use]
    pub fn from_config(config: ProviderConfig) -> Self {
        Self {
            inner: MemoryProvider::new(config),
            calls: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            down: AtomicBool::new(false),
        }
    }

    /// Number of calls recorded under `key` (`"insert"` or `"insert:users"`).
    #[must_use]
    pub fn calls(&self, key: &str) -> usize {
        self.calls
            .lock()
            .map(|c| c.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Forget all recorded calls.
    pub fn reset_calls(&self) {
        if let Ok(mut guard) = self.calls.lock() {
            guard.clear();
        }
    }

    /// Fail the next `times` calls matching `key` with `error`.
    pub fn fail_next(&self, key: impl Into<String>, error: PersistenceError, times: usize) {
        if let Ok(mut guard) = self.failures.lock() {
            guard.insert(
                key.into(),
                Injection {
                    error,
                    remaining: Some(times),
                },
            );
        }
    }

    /// Fail every call matching `key` with `error` until cleared.
    pub fn fail_always(&self, key: impl Into<String>, error: PersistenceError) {
        if let Ok(mut guard) = self.failures.lock() {
            guard.insert(
                key.into(),
                Injection {
                    error,
                    remaining: None,
                },
            );
        }
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        if let Ok(mut guard) = self.failures.lock() {
            guard.clear();
        }
    }

    /// Delay every data call by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        if let Ok(mut guard) = self.delay.lock() {
            *guard = delay;
        }
    }

    /// Take the provider down (probes, initialize and data calls fail with a
    /// connection error) or bring it back.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
        self.inner.set_reachable(!down);
    }

    /// A connection error attributed to this provider.
    #[must_use]
    pub fn connection_error(&self, reason: &str) -> PersistenceError {
        PersistenceError::connection(self.inner.name(), self.inner.technology(), reason)
    }

    /// A provider-reported data error attributed to this provider.
    #[must_use]
    pub fn data_error(&self, operation: &str, reason: &str) -> PersistenceError {
        PersistenceError::provider(self.inner.name(), self.inner.technology(), operation, reason)
    }

    /// Every record currently stored in `table`, bypassing counters and
    /// injected failures.
    pub async fn rows(&self, table: &str) -> Vec<Record> {
        let ctx = ExecutionContext::new();
        match self.inner.query(&ctx, &QuerySpec::select(table)).await {
            Ok(stream) => stream.filter_map(|r| async move { r.ok() }).collect().await,
            Err(_) => Vec::new(),
        }
    }

    fn bump(&self, key: &str) {
        if let Ok(mut guard) = self.calls.lock() {
            let n = guard.entry(key.to_owned()).or_insert(0);
            *n = n.saturating_add(1);
        }
    }

    fn injected(&self, key: &str) -> Option<PersistenceError> {
        let mut guard = self.failures.lock().ok()?;
        let injection = guard.get_mut(key)?;
        if injection.remaining == Some(0) {
            guard.remove(key);
            return None;
        }
        let error = injection.error.clone();
        if let Some(n) = injection.remaining.as_mut() {
            *n = n.saturating_sub(1);
        }
        if injection.remaining == Some(0) {
            guard.remove(key);
        }
        Some(error)
    }

    /// Count the call and apply delay, outage and injected failures.
    async fn enter(&self, op: &str, table: Option<&str>) -> PersistenceResult<()> {
        let scoped = table.map(|t| format!("{op}:{t}"));
        self.bump(op);
        if let Some(key) = &scoped {
            self.bump(key);
        }
        let delay = self.delay.lock().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(self.connection_error("provider is down"));
        }
        if let Some(err) = scoped
            .as_deref()
            .and_then(|k| self.injected(k))
            .or_else(|| self.injected(op))
        {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn technology(&self) -> TechnologyType {
        self.inner.technology()
    }

    async fn initialize(&self) -> PersistenceResult<()> {
        self.enter("initialize", None).await?;
        self.inner.initialize().await
    }

    async fn shutdown(&self) -> PersistenceResult<()> {
        self.bump("shutdown");
        self.inner.shutdown().await
    }

    async fn test_connection(&self) -> PersistenceResult<()> {
        self.enter("test_connection", None).await?;
        self.inner.test_connection().await
    }

    async fn health_status(&self) -> ProviderHealth {
        match self.test_connection().await {
            Ok(()) => ProviderHealth::healthy(0),
            Err(e) => ProviderHealth::unhealthy(e.to_string()),
        }
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> PersistenceResult<()> {
        self.enter("create_table", Some(table)).await?;
        self.inner.create_table(table, schema).await
    }

    async fn drop_table(&self, table: &str) -> PersistenceResult<()> {
        self.enter("drop_table", Some(table)).await?;
        self.inner.drop_table(table).await
    }

    async fn table_exists(&self, table: &str) -> PersistenceResult<bool> {
        self.enter("table_exists", Some(table)).await?;
        self.inner.table_exists(table).await
    }

    async fn insert(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        record: Record,
    ) -> PersistenceResult<Record> {
        self.enter("insert", Some(table)).await?;
        self.inner.insert(ctx, table, record).await
    }

    async fn update(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> PersistenceResult<Record> {
        self.enter("update", Some(table)).await?;
        self.inner.update(ctx, table, id, patch).await
    }

    async fn delete(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        id: &str,
    ) -> PersistenceResult<bool> {
        self.enter("delete", Some(table)).await?;
        self.inner.delete(ctx, table, id).await
    }

    async fn query(
        &self,
        ctx: &ExecutionContext,
        spec: &QuerySpec,
    ) -> PersistenceResult<RecordStream> {
        self.enter("query", Some(&spec.table)).await?;
        self.inner.query(ctx, spec).await
    }

    async fn begin_transaction(
        &self,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<TransactionHandle> {
        self.enter("begin_transaction", None).await?;
        self.inner.begin_transaction(ctx).await
    }

    async fn commit(&self, handle: &TransactionHandle) -> PersistenceResult<()> {
        self.enter("commit", None).await?;
        self.inner.commit(handle).await
    }

    async fn rollback(&self, handle: &TransactionHandle) -> PersistenceResult<()> {
        self.enter("rollback", None).await?;
        self.inner.rollback(handle).await
    }

    async fn execute_specific_operation(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        operation: &str,
        params: &Value,
    ) -> PersistenceResult<Value> {
        self.enter(operation, Some(table)).await?;
        self.inner
            .execute_specific_operation(ctx, table, operation, params)
            .await
    }

    fn supported_query_types(&self) -> HashSet<QueryKind> {
        self.inner.supported_query_types()
    }

    fn supported_data_types(&self) -> HashSet<DataType> {
        self.inner.supported_data_types()
    }

    fn supports_feature(&self, feature: Feature) -> bool {
        self.inner.supports_feature(feature)
    }

    fn metrics(&self) -> ProviderMetrics {
        self.inner.metrics()
    }
}

/// Factory that hands out [`MockProvider`]s and keeps them reachable for
/// assertions.
///
/// Providers can be pre-staged with [`MockFactory::stage`] so a test can set
/// up failure injection before the registry creates them.
#[derive(Debug)]
pub struct MockFactory {
    technology: TechnologyType,
    created: Mutex<HashMap<String, Arc<MockProvider>>>,
    staged: Mutex<HashMap<String, Arc<MockProvider>>>,
    reject: AtomicBool,
}

impl MockFactory {
    /// Factory for `technology`.
    #[must_use]
    pub fn new(technology: TechnologyType) -> Self {
        Self {
            technology,
            created: Mutex::new(HashMap::new()),
            staged: Mutex::new(HashMap::new()),
            reject: AtomicBool::new(false),
        }
    }

    /// One shared factory per technology.
    #[must_use]
    pub fn all() -> Vec<Arc<Self>> {
        TechnologyType::ALL
            .into_iter()
            .map(|t| Arc::new(Self::new(t)))
            .collect()
    }

    /// Hand out `provider` the next time a provider with its name is created.
    pub fn stage(&self, provider: Arc<MockProvider>) {
        if let Ok(mut guard) = self.staged.lock() {
            guard.insert(provider.name().to_owned(), provider);
        }
    }

    /// Make `create` fail with a configuration error.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// The most recent provider created under `name`.
    #[must_use]
    pub fn provider(&self, name: &str) -> Option<Arc<MockProvider>> {
        self.created.lock().ok()?.get(name).cloned()
    }
}

impl ProviderFactory for MockFactory {
    fn technology(&self) -> TechnologyType {
        self.technology
    }

    fn create(&self, config: &ProviderConfig) -> PersistenceResult<Arc<dyn Provider>> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(PersistenceError::Configuration(format!(
                "mock factory rejected '{}'",
                config.name
            )));
        }
        let staged = self
            .staged
            .lock()
            .ok()
            .and_then(|mut g| g.remove(&config.name));
        let provider = staged.unwrap_or_else(|| Arc::new(MockProvider::from_config(config.clone())));
        if let Ok(mut guard) = self.created.lock() {
            guard.insert(config.name.clone(), Arc::clone(&provider));
        }
        Ok(provider)
    }
}

/// Observability hook that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingHook {
    events: Mutex<Vec<OperationEvent>>,
}

impl RecordingHook {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every recorded event.
    #[must_use]
    pub fn events(&self) -> Vec<OperationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events for `operation`.
    #[must_use]
    pub fn events_for(&self, operation: &str) -> Vec<OperationEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.operation == operation)
            .collect()
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.lock() {
            guard.clear();
        }
    }
}

impl ObservabilityHook for RecordingHook {
    fn record(&self, event: &OperationEvent) {
        if let Ok(mut guard) = self.events.lock() {
            guard.push(event.clone());
        }
    }
}
