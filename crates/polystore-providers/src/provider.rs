//! The in-memory adapter.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use polystore_core::{
    DataType, ExecutionContext, Feature, PersistenceError, PersistenceResult, Provider,
    ProviderConfig, ProviderHealth, ProviderMetrics, QueryKind, QuerySpec, Record, RecordStream,
    TableSchema, TechnologyType, TransactionHandle,
};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::profile::{Capabilities, capabilities};
use crate::store::Store;
use crate::{aggregate, graph, text, vector};
use crate::params::Params;

/// Adapter that keeps every table in process memory.
///
/// Behaviour follows the configured technology's capability profile: cache
/// inserts overwrite, analytical tables are append-only, and only
/// transaction-capable profiles accept `begin_transaction`. A native
/// transaction works on a copy of the store that replaces it on commit.
///
/// The `simulated_latency_ms` option delays every data call, which is useful
/// for exercising deadlines.
pub struct MemoryProvider {
    config: ProviderConfig,
    caps: Capabilities,
    latency: Option<Duration>,
    connected: AtomicBool,
    reachable: AtomicBool,
    store: RwLock<Store>,
    transactions: Mutex<HashMap<String, Store>>,
    operations: AtomicU64,
    failures: AtomicU64,
    records_read: AtomicU64,
    records_written: AtomicU64,
}

impl std::fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("name", &self.config.name)
            .field("technology", &self.config.technology)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MemoryProvider {
    /// Build an unconnected adapter for `config`.
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let latency = config
            .options
            .get("simulated_latency_ms")
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
        Self {
            caps: capabilities(&config),
            latency,
            config,
            connected: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            store: RwLock::new(Store::default()),
            transactions: Mutex::new(HashMap::new()),
            operations: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            records_read: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
        }
    }

    /// Declared capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    /// Simulate losing (or regaining) the backing store. While unreachable,
    /// connection probes and `initialize` fail and data calls return
    /// connection errors.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
        if !reachable {
            self.connected.store(false, Ordering::SeqCst);
        }
    }

    fn connection_error(&self, reason: &str) -> PersistenceError {
        PersistenceError::connection(&self.config.name, self.config.technology, reason)
    }

    async fn enter(&self) -> PersistenceResult<()> {
        self.operations.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
            Err(self.connection_error("not connected"))
        }
    }

    fn fail<T>(&self, err: PersistenceError) -> PersistenceResult<T> {
        self.failures.fetch_add(1, Ordering::Relaxed);
        Err(err)
    }

    fn own_transaction<'c>(&self, ctx: &'c ExecutionContext) -> Option<&'c TransactionHandle> {
        ctx.transaction
            .as_ref()
            .filter(|h| h.provider == self.config.name)
    }

    fn unknown_transaction(&self, operation: &str, id: &str) -> PersistenceError {
        PersistenceError::provider(
            &self.config.name,
            self.config.technology,
            operation,
            format!("unknown transaction '{id}'"),
        )
    }

    async fn with_store_mut<T>(
        &self,
        ctx: &ExecutionContext,
        f: impl FnOnce(&mut Store) -> T + Send,
    ) -> PersistenceResult<T> {
        if let Some(handle) = self.own_transaction(ctx) {
            let mut txs = self.transactions.lock().await;
            let working = txs
                .get_mut(&handle.id)
                .ok_or_else(|| self.unknown_transaction("write", &handle.id))?;
            Ok(f(working))
        } else {
            Ok(f(&mut *self.store.write().await))
        }
    }

    async fn with_store<T>(
        &self,
        ctx: &ExecutionContext,
        f: impl FnOnce(&Store) -> T + Send,
    ) -> PersistenceResult<T> {
        if let Some(handle) = self.own_transaction(ctx) {
            let txs = self.transactions.lock().await;
            let working = txs
                .get(&handle.id)
                .ok_or_else(|| self.unknown_transaction("read", &handle.id))?;
            Ok(f(working))
        } else {
            Ok(f(&*self.store.read().await))
        }
    }

    fn ensure_kind(&self, table: &str, kind: QueryKind) -> PersistenceResult<()> {
        if self.caps.query_kinds.contains(&kind) {
            Ok(())
        } else {
            Err(PersistenceError::validation(
                table,
                kind.as_str(),
                format!(
                    "{} provider '{}' does not support {kind}",
                    self.config.technology, self.config.name
                ),
            ))
        }
    }

    fn count_read(&self, n: usize) {
        self.records_read
            .fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    fn count_written(&self, n: usize) {
        self.records_written
            .fetch_add(u64::try_from(n).unwrap_or(u64::MAX), Ordering::Relaxed);
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn technology(&self) -> TechnologyType {
        self.config.technology
    }

    async fn initialize(&self) -> PersistenceResult<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.connection_error("store unreachable"));
        }
        self.connected.store(true, Ordering::SeqCst);
        info!(
            provider = %self.config.name,
            technology = %self.config.technology,
            hosts = ?self.config.hosts,
            "Provider connected"
        );
        Ok(())
    }

    async fn shutdown(&self) -> PersistenceResult<()> {
        if self.connected.swap(false, Ordering::SeqCst) {
            let open = {
                let mut txs = self.transactions.lock().await;
                let n = txs.len();
                txs.clear();
                n
            };
            info!(provider = %self.config.name, abandoned_transactions = open, "Provider disconnected");
        }
        Ok(())
    }

    async fn test_connection(&self) -> PersistenceResult<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.connection_error("store unreachable"));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(self.connection_error("not connected"));
        }
        Ok(())
    }

    async fn health_status(&self) -> ProviderHealth {
        let started = Instant::now();
        match self.test_connection().await {
            Ok(()) => ProviderHealth::healthy(
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            ),
            Err(e) => ProviderHealth::unhealthy(e.to_string()),
        }
    }

    async fn create_table(&self, table: &str, schema: &TableSchema) -> PersistenceResult<()> {
        self.enter().await?;
        let mut store = self.store.write().await;
        store.table_mut(table).schema = Some(schema.clone());
        debug!(provider = %self.config.name, table, fields = schema.fields.len(), "Table created");
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> PersistenceResult<()> {
        self.enter().await?;
        self.store.write().await.tables.remove(table);
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> PersistenceResult<bool> {
        self.enter().await?;
        Ok(self.store.read().await.table(table).is_some())
    }

    async fn insert(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        record: Record,
    ) -> PersistenceResult<Record> {
        self.enter().await?;
        let upsert = self.caps.upsert_on_insert;
        match self
            .with_store_mut(ctx, |s| s.insert(table, record, upsert))
            .await?
        {
            Ok(stored) => {
                self.count_written(1);
                Ok(stored)
            },
            Err(rejected) => self.fail(PersistenceError::provider(
                &self.config.name,
                self.config.technology,
                "insert",
                rejected.to_string(),
            )),
        }
    }

    async fn update(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
    ) -> PersistenceResult<Record> {
        self.enter().await?;
        self.ensure_kind(table, QueryKind::Update)?;
        let updated = self
            .with_store_mut(ctx, |s| s.update(table, id, &patch))
            .await??;
        self.count_written(1);
        Ok(updated)
    }

    async fn delete(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        id: &str,
    ) -> PersistenceResult<bool> {
        self.enter().await?;
        self.ensure_kind(table, QueryKind::Delete)?;
        let existed = self.with_store_mut(ctx, |s| s.delete(table, id)).await?;
        if existed {
            self.count_written(1);
        }
        Ok(existed)
    }

    async fn query(
        &self,
        ctx: &ExecutionContext,
        spec: &QuerySpec,
    ) -> PersistenceResult<RecordStream> {
        self.enter().await?;
        if spec.kind.is_specific() || spec.kind.is_write() {
            return Err(PersistenceError::validation(
                &spec.table,
                spec.kind.as_str(),
                "not a read; use the dedicated operation",
            ));
        }
        let rows: Vec<Record> = self
            .with_store(ctx, |s| {
                s.table(&spec.table)
                    .map(|t| t.rows.values().cloned().collect())
                    .unwrap_or_default()
            })
            .await?;
        let records = spec.apply_to(rows);
        self.count_read(records.len());
        debug!(
            provider = %self.config.name,
            table = %spec.table,
            returned = records.len(),
            "Query evaluated"
        );
        Ok(futures::stream::iter(records.into_iter().map(Ok)).boxed())
    }

    async fn begin_transaction(
        &self,
        _ctx: &ExecutionContext,
    ) -> PersistenceResult<TransactionHandle> {
        self.enter().await?;
        if !self.supports_transactions() {
            return Err(PersistenceError::validation(
                &self.config.name,
                "begin_transaction",
                format!("{} provider has no native transactions", self.config.technology),
            ));
        }
        let snapshot = self.store.read().await.clone();
        let handle = TransactionHandle {
            id: uuid::Uuid::new_v4().to_string(),
            provider: self.config.name.clone(),
        };
        self.transactions
            .lock()
            .await
            .insert(handle.id.clone(), snapshot);
        debug!(provider = %self.config.name, transaction = %handle.id, "Transaction opened");
        Ok(handle)
    }

    async fn commit(&self, handle: &TransactionHandle) -> PersistenceResult<()> {
        self.enter().await?;
        let working = self
            .transactions
            .lock()
            .await
            .remove(&handle.id)
            .ok_or_else(|| self.unknown_transaction("commit", &handle.id))?;
        *self.store.write().await = working;
        debug!(provider = %self.config.name, transaction = %handle.id, "Transaction committed");
        Ok(())
    }

    async fn rollback(&self, handle: &TransactionHandle) -> PersistenceResult<()> {
        // Idempotent; a transaction abandoned by shutdown is already gone.
        let existed = self.transactions.lock().await.remove(&handle.id).is_some();
        debug!(provider = %self.config.name, transaction = %handle.id, existed, "Transaction rolled back");
        Ok(())
    }

    async fn execute_specific_operation(
        &self,
        ctx: &ExecutionContext,
        table: &str,
        operation: &str,
        params: &Value,
    ) -> PersistenceResult<Value> {
        self.enter().await?;
        let kind = match operation {
            "vector_search" => QueryKind::VectorSearch,
            "full_text_search" => QueryKind::FullTextSearch,
            "graph_traversal" => QueryKind::GraphTraversal,
            "shortest_path" => QueryKind::ShortestPath,
            "aggregate" => QueryKind::Aggregate,
            other => {
                return self.fail(PersistenceError::validation(
                    table,
                    other,
                    format!("unknown operation for provider '{}'", self.config.name),
                ));
            },
        };
        self.ensure_kind(table, kind)?;
        let p = Params::new(table, operation, params);
        let result = self
            .with_store(ctx, |s| {
                let t = s.table(table);
                match kind {
                    QueryKind::VectorSearch => vector::search(t, &p),
                    QueryKind::FullTextSearch => text::search(t, &p),
                    QueryKind::GraphTraversal => graph::traverse(t, &p),
                    QueryKind::ShortestPath => graph::shortest_path(t, &p),
                    _ => aggregate::aggregate(t, &p),
                }
            })
            .await?;
        result.or_else(|e| self.fail(e))
    }

    fn supported_query_types(&self) -> HashSet<QueryKind> {
        self.caps.query_kinds.clone()
    }

    fn supported_data_types(&self) -> HashSet<DataType> {
        self.caps.data_types.clone()
    }

    fn supports_feature(&self, feature: Feature) -> bool {
        self.caps.features.contains(&feature)
    }

    fn metrics(&self) -> ProviderMetrics {
        let active = self
            .transactions
            .try_lock()
            .map_or(0, |txs| u64::try_from(txs.len()).unwrap_or(u64::MAX));
        ProviderMetrics {
            operations: self.operations.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            records_read: self.records_read.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            active_transactions: active,
        }
    }
}
