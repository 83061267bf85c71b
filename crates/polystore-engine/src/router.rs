//! Query routing and planning.
//!
//! Routing is a static priority list: the table's primary technology if a
//! healthy provider serves it, otherwise the first healthy fallback in
//! declared order. There is no cost model: a plan's estimated cost is the
//! chosen technology's rank among the table's candidates. [`Router::optimize`]
//! is the place technology-aware rewrites happen, and it never fails a
//! request.

use std::sync::Arc;

use polystore_cache::{fingerprint, normalize_table};
use polystore_config::{PlatformConfig, TableConfig};
use polystore_core::{
    CachePolicy, CrossTechnologyQuery, ExecutionContext, Feature, Filter, HybridSearchQuery,
    Operator, PersistenceError, PersistenceResult, Provider, QueryKind, QuerySpec, TechnologyType,
};
use polystore_registry::ProviderRegistry;
use tracing::debug;

use crate::plan::{ExecutionPlan, MergeStrategy, MultiPlan};

/// A resolved provider for a table.
#[derive(Clone)]
pub struct Route {
    /// Technology chosen.
    pub technology: TechnologyType,
    /// Provider instance.
    pub provider: Arc<dyn Provider>,
    /// Whether a fallback was chosen over the primary.
    pub fallback: bool,
    /// Position of the chosen technology among the table's candidates.
    pub rank: usize,
    /// Healthy candidates after the chosen one, in declared order.
    pub fallback_order: Vec<TechnologyType>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("technology", &self.technology)
            .field("provider", &self.provider.name())
            .field("fallback", &self.fallback)
            .field("rank", &self.rank)
            .field("fallback_order", &self.fallback_order)
            .finish()
    }
}

/// Decides where and how requests execute.
#[derive(Debug)]
pub struct Router {
    config: Arc<PlatformConfig>,
    registry: Arc<ProviderRegistry>,
}

impl Router {
    /// Router over `config`, resolving providers through `registry`.
    #[must_use]
    pub fn new(config: Arc<PlatformConfig>, registry: Arc<ProviderRegistry>) -> Self {
        Self { config, registry }
    }

    /// Configuration of `table`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Routing`] if the table is not configured.
    pub fn table_config(&self, table: &str) -> PersistenceResult<&TableConfig> {
        self.config
            .tables
            .get(table)
            .or_else(|| self.config.tables.get(&normalize_table(table)))
            .ok_or_else(|| PersistenceError::routing(table, "table is not configured"))
    }

    /// Resolve the provider serving `table` without checking query support.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Routing`] if the table is unknown or no
    /// candidate technology has a healthy provider.
    pub fn route(&self, table: &str) -> PersistenceResult<Route> {
        let table_config = self.table_config(table)?;
        self.route_with(table, table_config)
    }

    fn route_with(&self, table: &str, table_config: &TableConfig) -> PersistenceResult<Route> {
        let candidates = table_config.candidates();
        for (index, technology) in candidates.iter().copied().enumerate() {
            if let Some(provider) = self.registry.healthy_provider_for(technology) {
                return Ok(self.route_at(&candidates, index, provider));
            }
        }
        let names: Vec<&str> = candidates.iter().map(|t| t.as_str()).collect();
        Err(PersistenceError::routing(
            table,
            format!("no healthy provider among [{}]", names.join(", ")),
        ))
    }

    fn route_at(
        &self,
        candidates: &[TechnologyType],
        index: usize,
        provider: Arc<dyn Provider>,
    ) -> Route {
        let fallback_order = candidates
            .iter()
            .skip(index.saturating_add(1))
            .copied()
            .filter(|t| self.registry.is_technology_healthy(*t))
            .collect();
        Route {
            technology: provider.technology(),
            provider,
            fallback: index > 0,
            rank: index,
            fallback_order,
        }
    }

    /// Re-resolve `pinned` for `table`: the same provider, provided it is
    /// still routable and `table` lists its technology.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Routing`] if `table` is unknown or does not list
    ///   the pinned technology.
    /// - [`PersistenceError::ProviderUnavailable`] if the pinned provider has
    ///   left rotation.
    pub fn route_pinned(&self, table: &str, pinned: &Route) -> PersistenceResult<Route> {
        let table_config = self.table_config(table)?;
        self.pinned_with(table, table_config, pinned)
    }

    fn pinned_with(
        &self,
        table: &str,
        table_config: &TableConfig,
        pinned: &Route,
    ) -> PersistenceResult<Route> {
        let name = pinned.provider.name();
        let provider = self.registry.get(name).ok_or_else(|| {
            PersistenceError::ProviderUnavailable {
                provider: name.to_owned(),
                attempts: 0,
                reason: "pinned provider is not routable".to_owned(),
            }
        })?;
        let candidates = table_config.candidates();
        let index = candidates
            .iter()
            .position(|t| *t == pinned.technology)
            .ok_or_else(|| {
                PersistenceError::routing(
                    table,
                    format!("{} is not a candidate technology", pinned.technology),
                )
            })?;
        Ok(self.route_at(&candidates, index, provider))
    }

    /// Plan a single-technology request.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Validation`] if the spec is malformed or the
    ///   chosen technology does not support its kind.
    /// - [`PersistenceError::Routing`] if no eligible technology is healthy.
    pub fn plan(&self, spec: &QuerySpec, ctx: &ExecutionContext) -> PersistenceResult<ExecutionPlan> {
        spec.validate()?;
        let table_config = self.table_config(&spec.table)?;
        let route = self.route_with(&spec.table, table_config)?;
        self.plan_with(spec, table_config, route, ctx)
    }

    /// Plan `spec` on the provider of `pinned` instead of choosing one.
    /// Native transactions use this so every step lands on the provider that
    /// opened the transaction.
    ///
    /// # Errors
    ///
    /// As [`Router::plan`] and [`Router::route_pinned`]. No fallback is tried.
    pub fn plan_pinned(
        &self,
        spec: &QuerySpec,
        pinned: &Route,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<ExecutionPlan> {
        spec.validate()?;
        let table_config = self.table_config(&spec.table)?;
        let route = self.pinned_with(&spec.table, table_config, pinned)?;
        self.plan_with(spec, table_config, route, ctx)
    }

    fn plan_with(
        &self,
        spec: &QuerySpec,
        table_config: &TableConfig,
        route: Route,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<ExecutionPlan> {
        let provider_name = route.provider.name().to_owned();

        if !route.provider.supported_query_types().contains(&spec.kind) {
            return Err(PersistenceError::validation(
                &spec.table,
                spec.kind.as_str(),
                format!(
                    "{} provider '{provider_name}' does not support {}",
                    route.technology, spec.kind
                ),
            ));
        }

        let plan = ExecutionPlan {
            fingerprint: fingerprint(spec),
            spec: self.optimize(spec, route.provider.as_ref()),
            technology: route.technology,
            provider: provider_name,
            cache: self.cache_policy(spec, table_config),
            fallback: route.fallback,
            estimated_cost: u32::try_from(route.rank).unwrap_or(u32::MAX),
            fallback_order: route.fallback_order,
        };
        debug!(
            trace_id = %ctx.trace_id,
            table = %spec.table,
            kind = %spec.kind,
            technology = %plan.technology,
            provider = %plan.provider,
            fallback = plan.fallback,
            estimated_cost = plan.estimated_cost,
            "Planned query"
        );
        Ok(plan)
    }

    /// Plan a write of `kind` against `table`.
    ///
    /// # Errors
    ///
    /// Same as [`Router::plan`].
    pub fn plan_write(
        &self,
        table: &str,
        kind: QueryKind,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<ExecutionPlan> {
        self.plan(&QuerySpec::new(table, kind), ctx)
    }

    /// Plan the two legs of a hybrid search. The vector leg comes first.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad weights or malformed legs, or a
    /// routing error if either leg has no eligible technology.
    pub fn plan_hybrid(
        &self,
        query: &HybridSearchQuery,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<MultiPlan> {
        query.validate()?;
        let vector = self.plan(&query.vector.to_query_spec()?, ctx)?;
        let text = self.plan(&query.text.to_query_spec()?, ctx)?;
        Ok(MultiPlan {
            legs: vec![vector, text],
            merge: MergeStrategy::Hybrid {
                weights: query.weights,
            },
            limit: Some(query.limit),
        })
    }

    /// Plan every source of a cross-technology query.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty source list, or the first
    /// source's planning error.
    pub fn plan_cross(
        &self,
        query: &CrossTechnologyQuery,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<MultiPlan> {
        if query.sources.is_empty() {
            return Err(PersistenceError::validation(
                "<cross>",
                "cross_technology",
                "no sources",
            ));
        }
        if let Some(source) = query.sources.iter().find(|s| s.kind.is_write()) {
            return Err(PersistenceError::validation(
                &source.table,
                "cross_technology",
                format!("{} is not a read", source.kind),
            ));
        }
        let legs = query
            .sources
            .iter()
            .map(|spec| self.plan(spec, ctx))
            .collect::<PersistenceResult<Vec<_>>>()?;
        Ok(MultiPlan {
            legs,
            merge: MergeStrategy::Set { merge: query.merge },
            limit: query.limit,
        })
    }

    /// Cache policy for `spec`: the named query's settings layered over the
    /// table default. Writes always use the table policy.
    #[must_use]
    pub fn cache_policy(&self, spec: &QuerySpec, table_config: &TableConfig) -> CachePolicy {
        if spec.kind.is_write() {
            return table_config.cache_policy();
        }
        spec.name
            .as_deref()
            .and_then(|name| self.config.queries.get(name))
            .filter(|q| normalize_table(&q.table) == normalize_table(&spec.table))
            .map_or_else(|| table_config.cache_policy(), |q| q.cache_policy(table_config))
    }

    /// Technology-aware rewrites.
    ///
    /// - an OR of equalities on one field becomes an `IN` when the provider
    ///   has native multi-get
    /// - a point lookup by id gets `limit 1` when the provider pushes limits
    ///   down
    /// - a count drops its sort order
    ///
    /// If the rewritten spec does not validate, the original is returned.
    #[must_use]
    pub fn optimize(&self, spec: &QuerySpec, provider: &dyn Provider) -> QuerySpec {
        let mut out = spec.clone();
        if provider.supports_feature(Feature::MultiGet)
            && let Some(filter) = &out.filter
        {
            out.filter = Some(rewrite_multi_get(filter));
        }
        if provider.supports_feature(Feature::LimitPushdown)
            && out.kind == QueryKind::Select
            && out.limit.is_none()
            && out.filter.as_ref().and_then(Filter::point_lookup_id).is_some()
        {
            out.limit = Some(1);
        }
        if out.kind == QueryKind::Count {
            out.order_by.clear();
        }
        match out.validate() {
            Ok(()) => out,
            Err(e) => {
                debug!(table = %spec.table, error = %e, "Optimization discarded");
                spec.clone()
            },
        }
    }
}

/// OR-of-equalities on one field to `IN`, at the top level and inside ANDs.
fn rewrite_multi_get(filter: &Filter) -> Filter {
    match filter {
        Filter::Or { filters } => or_to_in(filters).unwrap_or_else(|| filter.clone()),
        Filter::And { filters } => Filter::And {
            filters: filters.iter().map(rewrite_multi_get).collect(),
        },
        other => other.clone(),
    }
}

fn or_to_in(disjuncts: &[Filter]) -> Option<Filter> {
    if disjuncts.len() < 2 {
        return None;
    }
    let mut field_name: Option<&str> = None;
    let mut values = Vec::with_capacity(disjuncts.len());
    for filter in disjuncts {
        let Filter::Compare {
            field,
            op: Operator::Eq,
            value,
        } = filter
        else {
            return None;
        };
        match field_name {
            None => field_name = Some(field.as_str()),
            Some(existing) if existing == field.as_str() => {},
            Some(_) => return None,
        }
        values.push(value.clone());
    }
    field_name.map(|field| Filter::is_in(field, values))
}
