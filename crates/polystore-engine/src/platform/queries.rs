//! Reads: named and raw queries, batches, streams and the search family.

use polystore_core::template::{self, TemplateScope};
use polystore_core::transaction::PARAMS_SCOPE;
use polystore_core::{
    CrossTechnologyQuery, ExecutionContext, Filter, GraphTraversalQuery, HybridSearchQuery,
    PersistenceError, PersistenceResult, QueryKind, QuerySpec, RecordStream, ShortestPathQuery,
    ShortestPathResponse, TextSearchQuery, TextSearchResponse, TraversalResult,
    VectorSearchQuery, VectorSearchResponse, decode_response,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::Instrument;

use super::PersistencePlatform;
use crate::executor::{HybridResult, QueryResult};
use crate::plan::ExecutionPlan;

impl PersistencePlatform {
    /// Build the spec for named query `name`. Call parameters override the
    /// query's declared defaults.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown name, an unresolved
    /// placeholder or a filter that does not decode.
    pub fn named_query_spec(
        &self,
        name: &str,
        params: Map<String, Value>,
    ) -> PersistenceResult<QuerySpec> {
        let query = self.config.queries.get(name).ok_or_else(|| {
            PersistenceError::validation(name, "named_query", "unknown named query")
        })?;
        let mut merged = query.parameters.clone();
        merged.extend(params);

        let mut scope = TemplateScope::new();
        scope.insert(PARAMS_SCOPE.to_owned(), Value::Object(merged.clone()));

        let mut spec = QuerySpec::new(query.table.as_str(), query.kind)
            .named(name)
            .with_params(merged);
        if let Some(raw) = &query.filter {
            let rendered = template::render(raw, &scope).map_err(|e| {
                PersistenceError::validation(&query.table, "named_query", e.to_string())
            })?;
            let filter: Filter = serde_json::from_value(rendered).map_err(|e| {
                PersistenceError::validation(
                    &query.table,
                    "named_query",
                    format!("malformed filter in '{name}': {e}"),
                )
            })?;
            spec = spec.with_filter(filter);
        }
        if let Some(limit) = query.limit {
            spec = spec.with_limit(limit);
        }
        spec.order_by.clone_from(&query.order_by);
        Ok(spec)
    }

    /// Execute the named query `name` with `params`.
    ///
    /// # Errors
    ///
    /// See [`PersistencePlatform::named_query_spec`] and
    /// [`PersistencePlatform::execute_raw_query`].
    pub async fn execute_named_query(
        &self,
        name: &str,
        params: Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<QueryResult> {
        let ctx = self.prepare(ctx, "execute_named_query");
        async {
            let spec = self.named_query_spec(name, params)?;
            let plan = self.router.plan(&spec, &ctx)?;
            self.executor.execute(&plan, &ctx).await
        }
        .instrument(ctx.span())
        .await
    }

    /// Execute an ad-hoc query.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed spec or unsupported kind, a
    /// routing error if no eligible technology is healthy, or the execution
    /// error.
    pub async fn execute_raw_query(
        &self,
        spec: &QuerySpec,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<QueryResult> {
        let ctx = self.prepare(ctx, "execute_raw_query");
        async {
            let plan = self.router.plan(spec, &ctx)?;
            self.executor.execute(&plan, &ctx).await
        }
        .instrument(ctx.span())
        .await
    }

    /// Plan `spec` without executing it.
    ///
    /// # Errors
    ///
    /// Same planning errors as [`PersistencePlatform::execute_raw_query`].
    pub fn explain(&self, spec: &QuerySpec, ctx: &ExecutionContext) -> PersistenceResult<ExecutionPlan> {
        self.router.plan(spec, ctx)
    }

    /// Execute independent queries with bounded concurrency. Each result
    /// stands alone; results keep input order.
    pub async fn execute_batch(
        &self,
        specs: Vec<QuerySpec>,
        ctx: &ExecutionContext,
    ) -> Vec<PersistenceResult<QueryResult>> {
        let ctx = self.prepare(ctx, "execute_batch");
        self.executor
            .execute_batch(&self.router, specs, &ctx)
            .instrument(ctx.span())
            .await
    }

    /// Stream the records of a select without buffering or caching them.
    ///
    /// # Errors
    ///
    /// Returns a validation error for non-select specs, or the planning or
    /// provider error that prevented the stream from opening.
    pub async fn stream_query(
        &self,
        spec: &QuerySpec,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<RecordStream> {
        if spec.kind != QueryKind::Select {
            return Err(PersistenceError::validation(
                &spec.table,
                "stream_query",
                format!("only select can be streamed, got {}", spec.kind),
            ));
        }
        let ctx = self.prepare(ctx, "stream_query");
        async {
            let plan = self.router.plan(spec, &ctx)?;
            let provider = self.registry.get(&plan.provider).ok_or_else(|| {
                PersistenceError::ProviderUnavailable {
                    provider: plan.provider.clone(),
                    attempts: 0,
                    reason: "provider is not routable".to_owned(),
                }
            })?;
            ctx.run("stream_query", provider.query(&ctx, &plan.spec)).await
        }
        .instrument(ctx.span())
        .await
    }

    /// Run a specific-operation spec and decode its payload.
    async fn specific<T: DeserializeOwned>(
        &self,
        spec: PersistenceResult<QuerySpec>,
        operation: &str,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<T> {
        let ctx = self.prepare(ctx, operation);
        async {
            let spec = spec?;
            let plan = self.router.plan(&spec, &ctx)?;
            let result = self.executor.execute(&plan, &ctx).await?;
            let payload = result.payload.ok_or_else(|| {
                PersistenceError::provider(
                    &plan.provider,
                    plan.technology,
                    operation,
                    "provider returned no payload",
                )
            })?;
            decode_response(&spec.table, operation, payload)
        }
        .instrument(ctx.span())
        .await
    }

    /// Nearest-neighbour search.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed query or a table whose
    /// technology has no vector search, or the execution error.
    pub async fn vector_search(
        &self,
        query: &VectorSearchQuery,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<VectorSearchResponse> {
        self.specific(query.to_query_spec(), "vector_search", ctx).await
    }

    /// Full-text search.
    ///
    /// # Errors
    ///
    /// Same as [`PersistencePlatform::vector_search`].
    pub async fn text_search(
        &self,
        query: &TextSearchQuery,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<TextSearchResponse> {
        self.specific(query.to_query_spec(), "full_text_search", ctx).await
    }

    /// Breadth-first traversal from a start node.
    ///
    /// # Errors
    ///
    /// Same as [`PersistencePlatform::vector_search`].
    pub async fn graph_traversal(
        &self,
        query: &GraphTraversalQuery,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<TraversalResult> {
        self.specific(Ok(query.to_query_spec()), "graph_traversal", ctx).await
    }

    /// Lowest-weight path between two nodes.
    ///
    /// # Errors
    ///
    /// Same as [`PersistencePlatform::vector_search`].
    pub async fn shortest_path(
        &self,
        query: &ShortestPathQuery,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<ShortestPathResponse> {
        self.specific(Ok(query.to_query_spec()), "shortest_path", ctx).await
    }

    /// Vector and text search merged into one weighted ranking.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad weights or malformed legs, or the
    /// first failing leg's error.
    pub async fn hybrid_search(
        &self,
        query: &HybridSearchQuery,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<HybridResult> {
        let ctx = self.prepare(ctx, "hybrid_search");
        async {
            let plan = self.router.plan_hybrid(query, &ctx)?;
            self.executor.execute_hybrid(&plan, &ctx).await
        }
        .instrument(ctx.span())
        .await
    }

    /// Run reads against several tables, possibly on different technologies,
    /// and union or intersect the results by record id.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty or write-containing source
    /// list, or the first failing source's error.
    pub async fn cross_technology_query(
        &self,
        query: &CrossTechnologyQuery,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<QueryResult> {
        let ctx = self.prepare(ctx, "cross_technology_query");
        async {
            let plan = self.router.plan_cross(query, &ctx)?;
            self.executor.execute_cross(&plan, &ctx).await
        }
        .instrument(ctx.span())
        .await
    }
}
