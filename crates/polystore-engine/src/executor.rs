//! Plan execution.
//!
//! The executor runs plans against the provider the router chose. Every
//! provider call is bounded by the context deadline and retried with the
//! registry's backoff policy while the error is transient. Reads go through
//! the cache layer unless they run inside a native transaction, and every
//! call emits one [`OperationEvent`].

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use futures::FutureExt;
use polystore_cache::{CacheLayer, Refresher, record_key};
use polystore_config::ExecutorSection;
use polystore_core::{
    CacheStrategy, ExecutionContext, ObservabilityHook, OperationEvent, PersistenceError,
    PersistenceResult, Provider, QueryKind, QuerySpec, Record, RetryOutcome, RetryPolicy,
    ScoredRecord, TechnologyType, decode_response, retry,
};
use polystore_registry::ProviderRegistry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::merge;
use crate::plan::{ExecutionPlan, MergeStrategy, MultiPlan};
use crate::router::Router;

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Records returned. Empty for counts and most specific operations.
    #[serde(default)]
    pub records: Vec<Record>,
    /// Number of results: records, matches, hits, nodes or groups.
    pub count: usize,
    /// Raw provider payload for counts and specific operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Whether the result was served from the cache.
    #[serde(default)]
    pub from_cache: bool,
    /// Technology that served the request. `None` for merged results.
    pub technology: Option<TechnologyType>,
    /// Provider that served the request. `None` for merged results.
    pub provider: Option<String>,
    /// Wall-clock time of this call.
    #[serde(default)]
    pub execution_time_ms: u64,
}

/// Merged outcome of a hybrid search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridResult {
    /// Ranked records.
    pub results: Vec<ScoredRecord>,
    /// Technologies consulted, vector first.
    pub technologies: Vec<TechnologyType>,
    /// Wall-clock time of the whole fan-out.
    pub execution_time_ms: u64,
}

struct Fetched {
    records: Vec<Record>,
    count: usize,
    payload: Option<Value>,
}

impl Fetched {
    fn into_result(self, plan: &ExecutionPlan, started: Instant) -> QueryResult {
        QueryResult {
            records: self.records,
            count: self.count,
            payload: self.payload,
            from_cache: false,
            technology: Some(plan.technology),
            provider: Some(plan.provider.clone()),
            execution_time_ms: elapsed_ms(started),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Record list and result count of a specific-operation payload.
fn summarize(payload: &Value) -> (Vec<Record>, usize) {
    for key in ["matches", "hits"] {
        if let Some(items) = payload.get(key).and_then(Value::as_array) {
            let records = items
                .iter()
                .filter_map(|item| item.get("record"))
                .filter_map(|r| serde_json::from_value(r.clone()).ok())
                .collect();
            return (records, items.len());
        }
    }
    for key in ["nodes", "groups"] {
        if let Some(items) = payload.get(key).and_then(Value::as_array) {
            return (Vec::new(), items.len());
        }
    }
    match payload.get("path") {
        Some(Value::Null) | None => (Vec::new(), 0),
        Some(_) => (Vec::new(), 1),
    }
}

/// One provider round trip for a read spec.
async fn run_spec(
    provider: &dyn Provider,
    ctx: &ExecutionContext,
    spec: &QuerySpec,
) -> PersistenceResult<Fetched> {
    match spec.kind {
        QueryKind::Select => {
            let records: Vec<Record> = provider.query(ctx, spec).await?.try_collect().await?;
            Ok(Fetched {
                count: records.len(),
                records,
                payload: None,
            })
        },
        QueryKind::Count => {
            let count = provider
                .query(ctx, spec)
                .await?
                .try_fold(0_usize, |n, _| async move {
                    Ok::<_, PersistenceError>(n.saturating_add(1))
                })
                .await?;
            Ok(Fetched {
                records: Vec::new(),
                count,
                payload: Some(serde_json::json!({ "count": count })),
            })
        },
        kind if kind.is_specific() => {
            let payload = provider
                .execute_specific_operation(ctx, &spec.table, kind.as_str(), &spec.operation_payload())
                .await?;
            let (records, count) = summarize(&payload);
            Ok(Fetched {
                records,
                count,
                payload: Some(payload),
            })
        },
        kind => Err(PersistenceError::validation(
            &spec.table,
            kind.as_str(),
            "writes are not executed as queries",
        )),
    }
}

fn encode(plan: &ExecutionPlan, result: &QueryResult) -> PersistenceResult<Value> {
    serde_json::to_value(result).map_err(|e| {
        PersistenceError::provider(&plan.provider, plan.technology, "cache_encode", e.to_string())
    })
}

/// Runs plans against providers.
pub struct Executor {
    registry: Arc<ProviderRegistry>,
    cache: Arc<CacheLayer>,
    hooks: Arc<dyn ObservabilityHook>,
    retry: RetryPolicy,
    max_in_flight: usize,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("retry", &self.retry)
            .field("max_in_flight", &self.max_in_flight)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Executor resolving providers through `registry`. The retry policy is
    /// the registry's.
    #[must_use]
    pub fn new(
        registry: Arc<ProviderRegistry>,
        cache: Arc<CacheLayer>,
        hooks: Arc<dyn ObservabilityHook>,
        settings: &ExecutorSection,
    ) -> Self {
        Self {
            retry: registry.retry_policy().clone(),
            registry,
            cache,
            hooks,
            max_in_flight: settings.max_in_flight.max(1),
        }
    }

    /// Cache layer reads go through.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    fn provider_for(&self, plan: &ExecutionPlan) -> PersistenceResult<Arc<dyn Provider>> {
        self.registry
            .get(&plan.provider)
            .ok_or_else(|| PersistenceError::ProviderUnavailable {
                provider: plan.provider.clone(),
                attempts: 0,
                reason: "provider is not routable".to_owned(),
            })
    }

    /// Run `op` against the plan's provider with deadline and retry.
    ///
    /// Transient errors are retried. Once retries are exhausted the failure
    /// counts against the provider's health and surfaces as
    /// [`PersistenceError::ProviderUnavailable`].
    async fn call<T, F, Fut>(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
        operation: &str,
        op: F,
    ) -> PersistenceResult<T>
    where
        F: Fn(Arc<dyn Provider>) -> Fut,
        Fut: Future<Output = PersistenceResult<T>>,
    {
        let provider = self.provider_for(plan)?;
        let outcome = retry(
            &self.retry,
            ctx.deadline,
            |attempt| {
                if attempt > 0 {
                    debug!(provider = %plan.provider, operation, attempt, "Retrying");
                }
                ctx.run(operation, op(Arc::clone(&provider)))
            },
            PersistenceError::is_transient,
        )
        .await;

        match outcome {
            RetryOutcome::Success(value) => Ok(value),
            RetryOutcome::Exhausted { error, attempts } if error.is_transient() => {
                warn!(
                    provider = %plan.provider,
                    operation,
                    attempts,
                    error = %error,
                    "Retries exhausted"
                );
                self.registry.report_failure(&plan.provider, &error);
                Err(PersistenceError::ProviderUnavailable {
                    provider: plan.provider.clone(),
                    attempts,
                    reason: error.to_string(),
                })
            },
            RetryOutcome::Exhausted { error, .. } => Err(error),
            RetryOutcome::DeadlineReached { error, attempts } => {
                warn!(
                    provider = %plan.provider,
                    operation,
                    attempts,
                    error = %error,
                    "Deadline reached while retrying"
                );
                if error.is_transient() {
                    self.registry.report_failure(&plan.provider, &error);
                }
                Err(PersistenceError::Timeout {
                    operation: operation.to_owned(),
                    elapsed_ms: ctx.elapsed_ms(),
                })
            },
        }
    }

    fn emit<T>(
        &self,
        plan: &ExecutionPlan,
        operation: &str,
        started: Instant,
        result: &PersistenceResult<T>,
        summary: impl FnOnce(&T) -> (usize, bool),
    ) {
        let mut event = OperationEvent::new(operation);
        event.table = Some(plan.table().to_owned());
        event.technology = Some(plan.technology);
        event.provider = Some(plan.provider.clone());
        event.duration = started.elapsed();
        match result {
            Ok(value) => {
                let (affected, from_cache) = summary(value);
                event.affected = affected;
                event.from_cache = from_cache;
            },
            Err(e) => {
                event.success = false;
                event.error_kind = Some(e.kind());
            },
        }
        self.hooks.record(&event);
    }

    /// Execute a read plan.
    ///
    /// Outside a native transaction the result goes through the cache with
    /// the plan's policy; concurrent identical reads share one fetch.
    ///
    /// # Errors
    ///
    /// Returns the provider error, a timeout, or
    /// [`PersistenceError::ProviderUnavailable`] after exhausted retries.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<QueryResult> {
        let started = Instant::now();
        let operation = plan.spec.kind.as_str();
        let result = if ctx.transaction.is_some() {
            self.fetch(plan, ctx, started).await
        } else {
            self.execute_cached(plan, ctx, started).await
        };
        self.emit(plan, operation, started, &result, |r| (r.count, r.from_cache));
        result
    }

    async fn fetch(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> PersistenceResult<QueryResult> {
        let spec = &plan.spec;
        let fetched = self
            .call(plan, ctx, spec.kind.as_str(), |provider| async move {
                run_spec(provider.as_ref(), ctx, spec).await
            })
            .await?;
        Ok(fetched.into_result(plan, started))
    }

    async fn execute_cached(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> PersistenceResult<QueryResult> {
        let lookup = self
            .cache
            .get_or_fetch(&plan.fingerprint, plan.table(), &plan.cache, || async {
                let result = self.fetch(plan, ctx, started).await?;
                encode(plan, &result)
            })
            .await?;

        let mut result: QueryResult = decode_response(plan.table(), "cache_decode", lookup.value)?;
        result.from_cache = lookup.from_cache;
        result.execution_time_ms = elapsed_ms(started);

        if !lookup.from_cache && plan.cache.strategy == CacheStrategy::RefreshAhead {
            if let Ok(provider) = self.provider_for(plan) {
                self.cache
                    .register_refresher(&plan.fingerprint, refresher(plan, provider));
            }
        }
        Ok(result)
    }

    /// Execute independent read plans concurrently. Results keep plan order.
    pub async fn execute_all(
        &self,
        plans: &[ExecutionPlan],
        ctx: &ExecutionContext,
    ) -> Vec<PersistenceResult<QueryResult>> {
        futures::future::join_all(plans.iter().map(|plan| self.execute(plan, ctx))).await
    }

    /// Plan and execute `specs` with at most `max_in_flight` running at once.
    ///
    /// Each spec succeeds or fails on its own; results keep input order.
    pub async fn execute_batch(
        &self,
        router: &Router,
        specs: Vec<QuerySpec>,
        ctx: &ExecutionContext,
    ) -> Vec<PersistenceResult<QueryResult>> {
        stream::iter(specs)
            .map(|spec| async move {
                let plan = router.plan(&spec, ctx)?;
                self.execute(&plan, ctx).await
            })
            .buffered(self.max_in_flight)
            .collect()
            .await
    }

    /// Run both legs of a hybrid plan and rank the merged candidates.
    ///
    /// # Errors
    ///
    /// Returns the first failing leg's error, or a validation error if the
    /// plan is not a hybrid plan.
    pub async fn execute_hybrid(
        &self,
        plan: &MultiPlan,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<HybridResult> {
        let started = Instant::now();
        let (MergeStrategy::Hybrid { weights }, [vector_leg, text_leg]) =
            (plan.merge, plan.legs.as_slice())
        else {
            return Err(PersistenceError::validation(
                "<hybrid>",
                "hybrid_search",
                "plan must have a vector and a text leg",
            ));
        };
        let (vector, text) =
            futures::future::join(self.execute(vector_leg, ctx), self.execute(text_leg, ctx)).await;
        let vector = payload_of(vector_leg, vector?)?;
        let text = payload_of(text_leg, text?)?;
        Ok(HybridResult {
            results: merge::hybrid(
                &decode_response(vector_leg.table(), "vector_search", vector)?,
                &decode_response(text_leg.table(), "full_text_search", text)?,
                weights,
                plan.limit,
            ),
            technologies: plan.technologies(),
            execution_time_ms: elapsed_ms(started),
        })
    }

    /// Run every leg of a cross-technology plan and merge the record sets.
    ///
    /// # Errors
    ///
    /// Returns the first failing leg's error, or a validation error if the
    /// plan is not a set plan.
    pub async fn execute_cross(
        &self,
        plan: &MultiPlan,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<QueryResult> {
        let started = Instant::now();
        let MergeStrategy::Set { merge } = plan.merge else {
            return Err(PersistenceError::validation(
                "<cross>",
                "cross_technology",
                "plan is not a set merge",
            ));
        };
        let results = self
            .execute_all(&plan.legs, ctx)
            .await
            .into_iter()
            .collect::<PersistenceResult<Vec<_>>>()?;
        let from_cache = results.iter().all(|r| r.from_cache);
        let records = merge::merge_sets(
            results.into_iter().map(|r| r.records).collect(),
            merge,
            plan.limit,
        );
        Ok(QueryResult {
            count: records.len(),
            records,
            payload: None,
            from_cache,
            technology: None,
            provider: None,
            execution_time_ms: elapsed_ms(started),
        })
    }

    /// Run a technology-specific operation directly, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::execute`].
    pub async fn specific(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
        operation: &str,
        params: &Value,
    ) -> PersistenceResult<Value> {
        let started = Instant::now();
        let table = plan.table();
        let result = self
            .call(plan, ctx, operation, |provider| async move {
                provider
                    .execute_specific_operation(ctx, table, operation, params)
                    .await
            })
            .await;
        self.emit(plan, operation, started, &result, |v| (summarize(v).1, false));
        result
    }

    /// Insert one record.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::execute`].
    pub async fn insert(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
        record: Record,
    ) -> PersistenceResult<Record> {
        let started = Instant::now();
        let table = plan.table();
        let result = self
            .call(plan, ctx, "insert", |provider| {
                let record = record.clone();
                async move { provider.insert(ctx, table, record).await }
            })
            .await;
        self.emit(plan, "insert", started, &result, |_| (1, false));
        if let Ok(stored) = &result {
            self.after_write(plan, ctx, Some(stored));
        }
        result
    }

    /// Insert several records in one provider call.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::execute`].
    pub async fn insert_batch(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
        records: Vec<Record>,
    ) -> PersistenceResult<Vec<Record>> {
        let started = Instant::now();
        let table = plan.table();
        let result = self
            .call(plan, ctx, "insert_batch", |provider| {
                let records = records.clone();
                async move { provider.insert_batch(ctx, table, records).await }
            })
            .await;
        self.emit(plan, "insert_batch", started, &result, |r| (r.len(), false));
        if let Ok(stored) = &result {
            self.after_write(plan, ctx, None);
            if plan.cache.strategy == CacheStrategy::WriteThrough && ctx.transaction.is_none() {
                let ttl = if plan.cache.ttl.is_zero() {
                    self.cache.default_ttl()
                } else {
                    plan.cache.ttl
                };
                for record in stored {
                    self.cache.put(
                        &record_key(table, &record.id),
                        table,
                        record.to_flat_value(),
                        ttl,
                        plan.cache.tags.clone(),
                    );
                }
            }
        }
        result
    }

    /// Patch the record with `id`.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::execute`]; a missing record is
    /// [`PersistenceError::NotFound`].
    pub async fn update(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
        id: &str,
        patch: Map<String, Value>,
    ) -> PersistenceResult<Record> {
        let started = Instant::now();
        let table = plan.table();
        let result = self
            .call(plan, ctx, "update", |provider| {
                let patch = patch.clone();
                async move { provider.update(ctx, table, id, patch).await }
            })
            .await;
        self.emit(plan, "update", started, &result, |_| (1, false));
        if let Ok(stored) = &result {
            self.after_write(plan, ctx, Some(stored));
        }
        result
    }

    /// Delete the record with `id`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Same as [`Executor::execute`].
    pub async fn delete(
        &self,
        plan: &ExecutionPlan,
        ctx: &ExecutionContext,
        id: &str,
    ) -> PersistenceResult<bool> {
        let started = Instant::now();
        let table = plan.table();
        let result = self
            .call(plan, ctx, "delete", |provider| async move {
                provider.delete(ctx, table, id).await
            })
            .await;
        self.emit(plan, "delete", started, &result, |existed| (usize::from(*existed), false));
        if result.is_ok() && ctx.transaction.is_none() {
            self.cache.remove(&record_key(table, id));
            self.after_write(plan, ctx, None);
        }
        result
    }

    /// Cache effect of a committed write. Writes inside a native transaction
    /// are invalidated when the transaction commits instead.
    fn after_write(&self, plan: &ExecutionPlan, ctx: &ExecutionContext, written: Option<&Record>) {
        if ctx.transaction.is_some() {
            return;
        }
        self.cache.on_write(
            plan.table(),
            &plan.cache,
            written.map(|r| (r.id.as_str(), r.to_flat_value())),
        );
    }
}

fn payload_of(plan: &ExecutionPlan, result: QueryResult) -> PersistenceResult<Value> {
    result.payload.ok_or_else(|| {
        PersistenceError::provider(
            &plan.provider,
            plan.technology,
            plan.spec.kind.as_str(),
            "provider returned no payload",
        )
    })
}

/// Reload closure for a refresh-ahead entry. Refreshes run outside any
/// caller's deadline.
fn refresher(plan: &ExecutionPlan, provider: Arc<dyn Provider>) -> Refresher {
    let plan = plan.clone();
    Arc::new(move || {
        let provider = Arc::clone(&provider);
        let plan = plan.clone();
        async move {
            let started = Instant::now();
            let ctx = ExecutionContext::new().with_operation("refresh_ahead");
            let fetched = run_spec(provider.as_ref(), &ctx, &plan.spec)
                .await
                .map_err(|e| e.to_string())?;
            serde_json::to_value(fetched.into_result(&plan, started)).map_err(|e| e.to_string())
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock, registry_for};
    use polystore_config::PlatformConfig;
    use polystore_core::{Filter, VectorSearchQuery};
    use polystore_test::{RecordingHook, test_config, test_context, test_document, test_user};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        router: Router,
        registry: Arc<ProviderRegistry>,
        executor: Executor,
        hook: Arc<RecordingHook>,
        factories: Vec<Arc<polystore_test::MockFactory>>,
    }

    async fn fixture_with(config: PlatformConfig) -> Fixture {
        let config = Arc::new(config);
        let (registry, factories) = registry_for(&config).await;
        let hook = Arc::new(RecordingHook::new());
        let executor = Executor::new(
            Arc::clone(&registry),
            Arc::new(CacheLayer::new(config.cache.clone())),
            Arc::clone(&hook) as Arc<dyn ObservabilityHook>,
            &config.executor,
        );
        Fixture {
            router: Router::new(config, Arc::clone(&registry)),
            registry,
            executor,
            hook,
            factories,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(test_config()).await
    }

    impl Fixture {
        async fn seed_user(&self, id: &str, name: &str) {
            let ctx = test_context();
            let plan = self.router.plan_write("users", QueryKind::Insert, &ctx).unwrap();
            self.executor.insert(&plan, &ctx, test_user(id, name)).await.unwrap();
        }

        fn select_user(&self, id: &str) -> ExecutionPlan {
            let spec = QuerySpec::select("users").with_filter(Filter::eq("id", id));
            self.router.plan(&spec, &test_context()).unwrap()
        }
    }

    #[tokio::test]
    async fn reads_are_cached_until_a_write() {
        let f = fixture().await;
        f.seed_user("u1", "Ada").await;
        let pg = mock(&f.factories, "pg");
        let ctx = test_context();

        let plan = f.select_user("u1");
        let first = f.executor.execute(&plan, &ctx).await.unwrap();
        let second = f.executor.execute(&plan, &ctx).await.unwrap();
        assert!(!first.from_cache);
        assert!(second.from_cache);
        assert_eq!(second.records, first.records);
        assert_eq!(pg.calls("query:users"), 1);

        let write = f.router.plan_write("users", QueryKind::Update, &ctx).unwrap();
        let mut patch = Map::new();
        patch.insert("name".into(), json!("Grace"));
        f.executor.update(&write, &ctx, "u1", patch).await.unwrap();

        let third = f.executor.execute(&plan, &ctx).await.unwrap();
        assert!(!third.from_cache);
        assert_eq!(third.records[0].field("name"), Some(json!("Grace")));
        assert_eq!(pg.calls("query:users"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_errors_are_retried() {
        let f = fixture().await;
        let pg = mock(&f.factories, "pg");
        pg.fail_next("query", pg.connection_error("reset"), 2);

        let plan = f.router.plan(&QuerySpec::select("accounts"), &test_context()).unwrap();
        let result = f.executor.execute(&plan, &test_context()).await.unwrap();
        assert_eq!(result.count, 0);
        assert_eq!(pg.calls("query"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_surface_as_unavailable() {
        let f = fixture().await;
        let pg = mock(&f.factories, "pg");
        pg.fail_always("query", pg.connection_error("refused"));

        let plan = f.router.plan(&QuerySpec::select("accounts"), &test_context()).unwrap();
        let err = f.executor.execute(&plan, &test_context()).await.unwrap_err();
        assert_eq!(err.kind(), "provider_unavailable");
        // One initial attempt plus three retries.
        assert_eq!(pg.calls("query"), 4);
        assert_eq!(
            f.registry.health("pg").map(|h| h.consecutive_failures),
            Some(1)
        );
    }

    #[tokio::test]
    async fn data_errors_are_not_retried() {
        let f = fixture().await;
        let pg = mock(&f.factories, "pg");
        pg.fail_next("query", pg.data_error("query", "bad column"), 1);

        let plan = f.router.plan(&QuerySpec::select("accounts"), &test_context()).unwrap();
        let err = f.executor.execute(&plan, &test_context()).await.unwrap_err();
        assert_eq!(err.kind(), "provider");
        assert_eq!(pg.calls("query"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_bounds_slow_providers() {
        let f = fixture().await;
        let pg = mock(&f.factories, "pg");
        pg.set_delay(Some(Duration::from_secs(2)));

        let ctx = test_context().with_timeout(Duration::from_millis(100));
        let plan = f.router.plan(&QuerySpec::select("accounts"), &ctx).unwrap();
        let err = f.executor.execute(&plan, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn every_call_emits_an_event() {
        let f = fixture().await;
        f.seed_user("u1", "Ada").await;
        let plan = f.select_user("u1");
        f.executor.execute(&plan, &test_context()).await.unwrap();
        f.executor.execute(&plan, &test_context()).await.unwrap();

        let inserts = f.hook.events_for("insert");
        assert_eq!(inserts.len(), 1);
        assert_eq!(inserts[0].technology, Some(TechnologyType::Relational));
        let selects = f.hook.events_for("select");
        assert_eq!(selects.len(), 2);
        assert!(!selects[0].from_cache);
        assert!(selects[1].from_cache);
        assert_eq!(selects[1].affected, 1);
    }

    #[tokio::test]
    async fn failed_calls_emit_error_kind() {
        let f = fixture().await;
        let pg = mock(&f.factories, "pg");
        pg.fail_next("delete", pg.data_error("delete", "locked"), 1);
        let plan = f.router.plan_write("accounts", QueryKind::Delete, &test_context()).unwrap();
        assert!(f.executor.delete(&plan, &test_context(), "a1").await.is_err());
        let events = f.hook.events_for("delete");
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert_eq!(events[0].error_kind, Some("provider"));
    }

    #[tokio::test]
    async fn count_returns_a_number_not_records() {
        let f = fixture().await;
        f.seed_user("u1", "Ada").await;
        f.seed_user("u2", "Grace").await;
        let plan = f
            .router
            .plan(&QuerySpec::new("users", QueryKind::Count), &test_context())
            .unwrap();
        let result = f.executor.execute(&plan, &test_context()).await.unwrap();
        assert_eq!(result.count, 2);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn specific_operations_report_their_records() {
        let f = fixture().await;
        let ctx = test_context();
        let write = f.router.plan_write("docs", QueryKind::Insert, &ctx).unwrap();
        f.executor
            .insert(&write, &ctx, test_document("d1", "rust", &[1.0, 0.0]))
            .await
            .unwrap();
        f.executor
            .insert(&write, &ctx, test_document("d2", "go", &[0.0, 1.0]))
            .await
            .unwrap();

        let spec = VectorSearchQuery::new("docs", vec![1.0, 0.0], 1)
            .to_query_spec()
            .unwrap();
        let plan = f.router.plan(&spec, &ctx).unwrap();
        let result = f.executor.execute(&plan, &ctx).await.unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.records[0].id, "d1");
        assert!(result.payload.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn batch_respects_concurrency_bound() {
        let f = fixture().await;
        let pg = mock(&f.factories, "pg");
        pg.set_delay(Some(Duration::from_millis(50)));

        let specs: Vec<QuerySpec> = (0..8)
            .map(|i| QuerySpec::select("accounts").with_filter(Filter::eq("id", format!("a{i}"))))
            .collect();
        let started = Instant::now();
        let results = f
            .executor
            .execute_batch(&f.router, specs, &test_context())
            .await;
        assert_eq!(results.len(), 8);
        assert!(results.iter().all(Result::is_ok));
        // Eight 50ms calls, four at a time.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(150), "{elapsed:?}");
    }

    #[tokio::test]
    async fn batch_items_fail_independently() {
        let f = fixture().await;
        let specs = vec![
            QuerySpec::select("accounts"),
            QuerySpec::select("nowhere"),
            QuerySpec::select("profiles"),
        ];
        let results = f
            .executor
            .execute_batch(&f.router, specs, &test_context())
            .await;
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().kind(), "routing");
        assert!(results[2].is_ok());
    }

    #[tokio::test]
    async fn transactional_reads_bypass_the_cache() {
        let f = fixture().await;
        f.seed_user("u1", "Ada").await;
        let pg = mock(&f.factories, "pg");
        let plan = f.select_user("u1");
        let handle = pg.begin_transaction(&test_context()).await.unwrap();
        let ctx = test_context().with_transaction(handle);

        f.executor.execute(&plan, &ctx).await.unwrap();
        f.executor.execute(&plan, &ctx).await.unwrap();
        assert_eq!(pg.calls("query:users"), 2);
        assert_eq!(f.executor.cache().stats().entries, 0);
    }
}
