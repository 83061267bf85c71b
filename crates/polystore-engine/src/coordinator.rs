//! Multi-step transactions.
//!
//! When every step lands on one provider that has native transactions, the
//! steps run inside a single begin/commit and a failure rolls back. Every
//! native step is pinned to that provider; if it leaves rotation mid-way the
//! step fails and the transaction rolls back rather than falling back. Anything
//! else runs as a saga: steps execute in order, and on the first failure the
//! compensations of completed steps run in reverse. A compensation failure
//! does not stop the others; the transaction is journaled for manual
//! remediation instead.
//!
//! Compensations always run to completion, even when the caller's deadline
//! has already passed. Leaving committed writes behind is worse than a late
//! answer.

use std::sync::Arc;

use polystore_core::{
    CachePolicy, ExecutionContext, OperationResult, PersistenceError, PersistenceResult, Provider,
    QueryKind, QuerySpec, Record, StepAction, StepReport, StepStatus, TransactionFailure,
    TransactionHandle, TransactionSpec, TransactionState, UnresolvedStep,
};
use polystore_core::template::TemplateScope;
use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::executor::Executor;
use crate::plan::ExecutionPlan;
use crate::remediation::RemediationJournal;
use crate::router::{Route, Router};

/// Label used as the failed step when a native commit fails.
const COMMIT_STEP: &str = "<commit>";

/// A completed forward action.
struct Executed {
    index: usize,
    report: StepReport,
}

/// Where a failure happened and why.
struct Failure {
    index: usize,
    step: String,
    table: String,
    cause: PersistenceError,
}

/// Runs [`TransactionSpec`]s.
#[derive(Debug)]
pub struct TransactionCoordinator {
    router: Arc<Router>,
    executor: Arc<Executor>,
    journal: Arc<RemediationJournal>,
}

impl TransactionCoordinator {
    /// Coordinator executing through `router` and `executor`, journaling
    /// unresolved failures to `journal`.
    #[must_use]
    pub fn new(
        router: Arc<Router>,
        executor: Arc<Executor>,
        journal: Arc<RemediationJournal>,
    ) -> Self {
        Self {
            router,
            executor,
            journal,
        }
    }

    /// Remediation journal.
    #[must_use]
    pub fn journal(&self) -> &Arc<RemediationJournal> {
        &self.journal
    }

    /// Execute `spec`.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Validation`] if the spec is malformed; nothing
    ///   runs.
    /// - [`PersistenceError::TransactionStepFailure`] if a step failed and
    ///   every completed step was compensated or rolled back.
    /// - [`PersistenceError::CompensationFailed`] if a step failed and the
    ///   undo did not fully succeed.
    pub async fn execute(
        &self,
        spec: &TransactionSpec,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<OperationResult> {
        spec.validate()?;
        let started = Instant::now();
        let native = self.native_route(spec);
        info!(
            transaction_id = %spec.id,
            operation = %spec.name,
            steps = spec.steps.len(),
            native = native.is_some(),
            "Transaction started"
        );
        let result = match native {
            Some(route) => self.run_native(spec, route, ctx, started).await,
            None => self.run_saga(spec, ctx, started).await,
        };
        match &result {
            Ok(r) => info!(
                transaction_id = %spec.id,
                operation = %spec.name,
                execution_time_ms = r.execution_time_ms,
                "Transaction completed"
            ),
            Err(e) => warn!(
                transaction_id = %spec.id,
                operation = %spec.name,
                error = %e,
                "Transaction failed"
            ),
        }
        result
    }

    /// The shared provider if every step routes to the same one and it can
    /// run native transactions.
    fn native_route(&self, spec: &TransactionSpec) -> Option<Route> {
        let mut chosen: Option<Route> = None;
        for step in &spec.steps {
            let route = self.router.route(step.action.table()).ok()?;
            match &chosen {
                Some(existing) if existing.provider.name() != route.provider.name() => return None,
                Some(_) => {},
                None => chosen = Some(route),
            }
        }
        chosen.filter(|r| r.provider.supports_transactions())
    }

    async fn run_native(
        &self,
        spec: &TransactionSpec,
        route: Route,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> PersistenceResult<OperationResult> {
        let provider = Arc::clone(&route.provider);
        let handle = ctx
            .run("begin_transaction", provider.begin_transaction(ctx))
            .await?;
        debug!(transaction_id = %spec.id, handle = %handle.id, provider = %provider.name(), "Native transaction opened");
        let tx_ctx = ctx.clone().with_transaction(handle.clone());

        let mut scope = spec.initial_scope();
        let mut executed = Vec::with_capacity(spec.steps.len());
        let mut outputs = Map::new();
        for (index, step) in spec.steps.iter().enumerate() {
            let state = TransactionState::Executing { step: index };
            debug!(transaction_id = %spec.id, %state, step = %step.name, "Running step");
            match self.run_step(&step.action, &scope, Some(&route), &tx_ctx).await {
                Ok((table, report_provider, output)) => {
                    scope.insert(step.name.clone(), output.clone());
                    outputs.insert(step.name.clone(), output.clone());
                    executed.push(Executed {
                        index,
                        report: committed(&step.name, table, report_provider, output),
                    });
                },
                Err((table, cause)) => {
                    let failure = Failure {
                        index,
                        step: step.name.clone(),
                        table,
                        cause,
                    };
                    return Err(self
                        .roll_back(spec, provider.as_ref(), &handle, executed, failure)
                        .await);
                },
            }
        }

        if let Err(cause) = ctx.run("commit", provider.commit(&handle)).await {
            let failure = Failure {
                index: spec.steps.len(),
                step: COMMIT_STEP.to_owned(),
                table: String::new(),
                cause,
            };
            return Err(self
                .roll_back(spec, provider.as_ref(), &handle, executed, failure)
                .await);
        }

        let steps: Vec<StepReport> = executed.into_iter().map(|e| e.report).collect();
        let affected_tables = affected_tables(&steps);
        for table in &affected_tables {
            self.executor.cache().invalidate(table);
        }
        Ok(OperationResult {
            transaction_id: spec.id.clone(),
            name: spec.name.clone(),
            state: TransactionState::Completed,
            outputs,
            steps,
            affected_tables,
            native: true,
            execution_time_ms: elapsed_ms(started),
        })
    }

    async fn roll_back(
        &self,
        spec: &TransactionSpec,
        provider: &dyn Provider,
        handle: &TransactionHandle,
        executed: Vec<Executed>,
        failure: Failure,
    ) -> PersistenceError {
        let rollback = provider.rollback(handle).await;
        let (state, status) = match &rollback {
            Ok(()) => (TransactionState::Compensated, StepStatus::RolledBack),
            Err(_) => (TransactionState::CompensationFailed, StepStatus::CompensationFailed),
        };
        let mut unresolved = Vec::new();
        let mut steps = Vec::with_capacity(spec.steps.len());
        for Executed { mut report, .. } in executed {
            report.status = status;
            if let Err(e) = &rollback {
                report.error = Some(e.to_string());
                unresolved.push(UnresolvedStep {
                    step: report.name.clone(),
                    table: report.table.clone(),
                    error: e.to_string(),
                });
            }
            steps.push(report);
        }
        self.finish_failure(spec, state, failure, steps, unresolved)
    }

    async fn run_saga(
        &self,
        spec: &TransactionSpec,
        ctx: &ExecutionContext,
        started: Instant,
    ) -> PersistenceResult<OperationResult> {
        let mut scope = spec.initial_scope();
        let mut executed = Vec::with_capacity(spec.steps.len());
        let mut outputs = Map::new();
        for (index, step) in spec.steps.iter().enumerate() {
            let state = TransactionState::Executing { step: index };
            debug!(transaction_id = %spec.id, %state, step = %step.name, "Running step");
            match self.run_step(&step.action, &scope, None, ctx).await {
                Ok((table, provider, output)) => {
                    scope.insert(step.name.clone(), output.clone());
                    outputs.insert(step.name.clone(), output.clone());
                    executed.push(Executed {
                        index,
                        report: committed(&step.name, table, provider, output),
                    });
                },
                Err((table, cause)) => {
                    let failure = Failure {
                        index,
                        step: step.name.clone(),
                        table,
                        cause,
                    };
                    return Err(self.compensate(spec, ctx, &scope, executed, failure).await);
                },
            }
        }

        let steps: Vec<StepReport> = executed.into_iter().map(|e| e.report).collect();
        Ok(OperationResult {
            transaction_id: spec.id.clone(),
            name: spec.name.clone(),
            state: TransactionState::Completed,
            outputs,
            affected_tables: affected_tables(&steps),
            steps,
            native: false,
            execution_time_ms: elapsed_ms(started),
        })
    }

    /// Undo completed steps in reverse order.
    async fn compensate(
        &self,
        spec: &TransactionSpec,
        ctx: &ExecutionContext,
        scope: &TemplateScope,
        executed: Vec<Executed>,
        failure: Failure,
    ) -> PersistenceError {
        if ctx.is_expired() || matches!(failure.cause, PersistenceError::Timeout { .. }) {
            warn!(
                transaction_id = %spec.id,
                step = %failure.step,
                "Deadline passed; compensating without a deadline"
            );
        }
        let comp_ctx = ctx.without_deadline().child("compensate");
        let mut unresolved = Vec::new();
        let mut steps = Vec::with_capacity(executed.len());
        for Executed { index, mut report } in executed.into_iter().rev() {
            let Some(compensation) = spec
                .steps
                .get(index)
                .and_then(|s| s.compensation.as_ref())
            else {
                report.status = StepStatus::NothingToCompensate;
                steps.push(report);
                continue;
            };
            let state = TransactionState::Compensating { step: index };
            debug!(transaction_id = %spec.id, %state, step = %report.name, "Compensating step");
            match self.run_step(compensation, scope, None, &comp_ctx).await {
                Ok(_) => report.status = StepStatus::Compensated,
                Err((_, e)) => {
                    warn!(
                        transaction_id = %spec.id,
                        step = %report.name,
                        error = %e,
                        "Compensation failed"
                    );
                    report.status = StepStatus::CompensationFailed;
                    report.error = Some(e.to_string());
                    unresolved.push(UnresolvedStep {
                        step: report.name.clone(),
                        table: report.table.clone(),
                        error: e.to_string(),
                    });
                },
            }
            steps.push(report);
        }
        steps.reverse();
        let state = if unresolved.is_empty() {
            TransactionState::Compensated
        } else {
            TransactionState::CompensationFailed
        };
        self.finish_failure(spec, state, failure, steps, unresolved)
    }

    /// Complete the step reports and build the caller-facing error.
    fn finish_failure(
        &self,
        spec: &TransactionSpec,
        state: TransactionState,
        failure: Failure,
        mut steps: Vec<StepReport>,
        unresolved: Vec<UnresolvedStep>,
    ) -> PersistenceError {
        if let Some(step) = spec.steps.get(failure.index) {
            steps.push(StepReport {
                name: step.name.clone(),
                table: failure.table.clone(),
                status: StepStatus::Failed,
                provider: None,
                output: None,
                error: Some(failure.cause.to_string()),
            });
        }
        let first_skipped = failure.index.saturating_add(1);
        steps.extend(
            spec.steps
                .iter()
                .skip(first_skipped)
                .map(StepReport::skipped),
        );

        let details = Box::new(TransactionFailure {
            transaction_id: spec.id.clone(),
            name: spec.name.clone(),
            state,
            failed_step: failure.step,
            failed_index: failure.index,
            cause: Box::new(failure.cause),
            steps,
            unresolved,
        });
        if state == TransactionState::CompensationFailed {
            error!(
                transaction_id = %details.transaction_id,
                operation = %details.name,
                failed_step = %details.failed_step,
                unresolved = details.unresolved.len(),
                "Manual remediation required"
            );
            self.journal.record(&details);
            PersistenceError::CompensationFailed(details)
        } else {
            PersistenceError::TransactionStepFailure(details)
        }
    }

    /// Render and run one action, on the `pinned` provider if given. Returns
    /// the table, serving provider and output, or the table and the error.
    async fn run_step(
        &self,
        action: &StepAction,
        scope: &TemplateScope,
        pinned: Option<&Route>,
        ctx: &ExecutionContext,
    ) -> Result<(String, String, Value), (String, PersistenceError)> {
        let action = action
            .render(scope)
            .map_err(|e| (action.table().to_owned(), e))?;
        let table = action.table().to_owned();
        match self.run_action(&action, pinned, ctx).await {
            Ok((provider, output)) => Ok((table, provider, output)),
            Err(e) => Err((table, e)),
        }
    }

    fn plan_step(
        &self,
        spec: &QuerySpec,
        pinned: Option<&Route>,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<ExecutionPlan> {
        match pinned {
            Some(route) => self.router.plan_pinned(spec, route, ctx),
            None => self.router.plan(spec, ctx),
        }
    }

    async fn run_action(
        &self,
        action: &StepAction,
        pinned: Option<&Route>,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<(String, Value)> {
        match action {
            StepAction::Insert { table, data } => {
                let spec = QuerySpec::new(table.as_str(), QueryKind::Insert);
                let plan = self.plan_step(&spec, pinned, ctx)?;
                let stored = self
                    .executor
                    .insert(&plan, ctx, Record::from_value(data.clone()))
                    .await?;
                Ok((plan.provider, stored.to_flat_value()))
            },
            StepAction::Update { table, id, data } => {
                let Value::Object(patch) = data else {
                    return Err(PersistenceError::validation(
                        table,
                        "update",
                        "update data must be an object",
                    ));
                };
                let spec = QuerySpec::new(table.as_str(), QueryKind::Update);
                let plan = self.plan_step(&spec, pinned, ctx)?;
                let stored = self.executor.update(&plan, ctx, id, patch.clone()).await?;
                Ok((plan.provider, stored.to_flat_value()))
            },
            StepAction::Delete { table, id } => {
                let spec = QuerySpec::new(table.as_str(), QueryKind::Delete);
                let plan = self.plan_step(&spec, pinned, ctx)?;
                let deleted = self.executor.delete(&plan, ctx, id).await?;
                Ok((plan.provider, json!({ "deleted": deleted, "id": id })))
            },
            StepAction::Query { table, limit, .. } => {
                let mut spec = QuerySpec::select(table.as_str());
                if let Some(filter) = action.decoded_filter()? {
                    spec = spec.with_filter(filter);
                }
                if let Some(limit) = limit {
                    spec = spec.with_limit(*limit);
                }
                let plan = self.plan_step(&spec, pinned, ctx)?;
                let result = self.executor.execute(&plan, ctx).await?;
                let records: Vec<Value> = result.records.iter().map(Record::to_flat_value).collect();
                Ok((plan.provider, json!({ "records": records, "count": result.count })))
            },
            StepAction::Specific {
                table,
                operation,
                params,
            } => {
                let route = match pinned {
                    Some(pinned) => self.router.route_pinned(table, pinned)?,
                    None => self.router.route(table)?,
                };
                let plan = ExecutionPlan {
                    spec: QuerySpec::select(table.as_str()),
                    fingerprint: String::new(),
                    technology: route.technology,
                    provider: route.provider.name().to_owned(),
                    cache: CachePolicy::bypass(),
                    fallback: route.fallback,
                    estimated_cost: u32::try_from(route.rank).unwrap_or(u32::MAX),
                    fallback_order: route.fallback_order,
                };
                let output = self.executor.specific(&plan, ctx, operation, params).await?;
                Ok((plan.provider, output))
            },
        }
    }
}

fn committed(name: &str, table: String, provider: String, output: Value) -> StepReport {
    StepReport {
        name: name.to_owned(),
        table,
        status: StepStatus::Committed,
        provider: Some(provider),
        output: Some(output),
        error: None,
    }
}

fn affected_tables(steps: &[StepReport]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for step in steps {
        if !tables.contains(&step.table) {
            tables.push(step.table.clone());
        }
    }
    tables
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock, registry_for};
    use polystore_cache::CacheLayer;
    use polystore_core::{NoopHook, ObservabilityHook, TransactionStep};
    use polystore_test::{MockFactory, test_config, test_context};
    use std::time::Duration;

    struct Fixture {
        coordinator: TransactionCoordinator,
        registry: Arc<polystore_registry::ProviderRegistry>,
        factories: Vec<Arc<MockFactory>>,
        config: Arc<polystore_config::PlatformConfig>,
    }

    async fn fixture() -> Fixture {
        let config = Arc::new(test_config());
        let (registry, factories) = registry_for(&config).await;
        let router = Arc::new(Router::new(Arc::clone(&config), Arc::clone(&registry)));
        let executor = Arc::new(Executor::new(
            Arc::clone(&registry),
            Arc::new(CacheLayer::new(config.cache.clone())),
            Arc::new(NoopHook) as Arc<dyn ObservabilityHook>,
            &config.executor,
        ));
        Fixture {
            coordinator: TransactionCoordinator::new(
                router,
                executor,
                Arc::new(RemediationJournal::new()),
            ),
            registry,
            factories,
            config,
        }
    }

    impl Fixture {
        fn operation(&self, name: &str, params: Value) -> TransactionSpec {
            let op = &self.config.operations[name];
            let Value::Object(params) = params else {
                panic!("params must be an object");
            };
            TransactionSpec::new(name, op.steps.clone()).with_parameters(params)
        }
    }

    fn register(f: &Fixture) -> TransactionSpec {
        f.operation("register_user", json!({"email": "ada@example.com", "name": "Ada"}))
    }

    #[tokio::test]
    async fn saga_runs_steps_in_order_and_threads_outputs() {
        let f = fixture().await;
        let result = f.coordinator.execute(&register(&f), &test_context()).await.unwrap();
        assert!(!result.native);
        assert_eq!(result.state, TransactionState::Completed);
        assert_eq!(result.affected_tables, vec!["users", "profiles"]);

        let user_id = result.outputs["create_user"]["id"].clone();
        let profiles = mock(&f.factories, "mongo").rows("profiles").await;
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].field("user_id"), Some(user_id));
        assert_eq!(profiles[0].field("display_name"), Some(json!("Ada")));
    }

    #[tokio::test]
    async fn failed_step_compensates_completed_steps() {
        let f = fixture().await;
        let mongo = mock(&f.factories, "mongo");
        mongo.fail_next("insert:profiles", mongo.data_error("insert", "duplicate key"), 1);

        let err = f.coordinator.execute(&register(&f), &test_context()).await.unwrap_err();
        let PersistenceError::TransactionStepFailure(failure) = err else {
            panic!("expected step failure, got {err:?}");
        };
        assert_eq!(failure.state, TransactionState::Compensated);
        assert_eq!(failure.failed_step, "create_profile");
        assert_eq!(failure.failed_index, 1);
        assert_eq!(failure.compensated_steps(), vec!["create_user"]);
        assert!(failure.unresolved.is_empty());
        assert!(mock(&f.factories, "pg").rows("users").await.is_empty());
        assert!(f.coordinator.journal().pending().is_empty());
    }

    #[tokio::test]
    async fn compensation_failure_is_journaled() {
        let f = fixture().await;
        let mongo = mock(&f.factories, "mongo");
        mongo.fail_next("insert:profiles", mongo.data_error("insert", "duplicate key"), 1);
        let pg = mock(&f.factories, "pg");
        pg.fail_always("delete:users", pg.data_error("delete", "row locked"));

        let err = f.coordinator.execute(&register(&f), &test_context()).await.unwrap_err();
        assert!(err.is_operator_actionable());
        let failure = err.transaction_failure().unwrap();
        assert_eq!(failure.state, TransactionState::CompensationFailed);
        assert_eq!(failure.unresolved.len(), 1);
        assert_eq!(failure.unresolved[0].step, "create_user");
        assert_eq!(failure.steps[0].status, StepStatus::CompensationFailed);
        assert_eq!(failure.steps[1].status, StepStatus::Failed);

        let pending = f.coordinator.journal().pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, failure.transaction_id);
        assert_eq!(pg.rows("users").await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn compensation_ignores_the_expired_deadline() {
        let f = fixture().await;
        mock(&f.factories, "mongo").set_delay(Some(Duration::from_secs(1)));

        let ctx = test_context().with_timeout(Duration::from_millis(100));
        let err = f.coordinator.execute(&register(&f), &ctx).await.unwrap_err();
        let failure = err.transaction_failure().unwrap();
        assert_eq!(failure.state, TransactionState::Compensated);
        assert_eq!(failure.cause.kind(), "timeout");
        assert!(mock(&f.factories, "pg").rows("users").await.is_empty());
    }

    #[tokio::test]
    async fn single_provider_operations_use_native_transactions() {
        let f = fixture().await;
        let op = f.operation("open_account", json!({"owner": "ada", "deposit": 100}));
        let result = f.coordinator.execute(&op, &test_context()).await.unwrap();
        assert!(result.native);
        assert_eq!(result.affected_tables, vec!["accounts", "ledger"]);

        let pg = mock(&f.factories, "pg");
        assert_eq!(pg.calls("begin_transaction"), 1);
        assert_eq!(pg.calls("commit"), 1);
        let ledger = pg.rows("ledger").await;
        assert_eq!(ledger[0].field("amount"), Some(json!(100)));
        assert_eq!(ledger[0].field("account"), Some(result.outputs["account"]["id"].clone()));
    }

    #[tokio::test]
    async fn native_failure_rolls_back_everything() {
        let f = fixture().await;
        let pg = mock(&f.factories, "pg");
        pg.fail_next("insert:ledger", pg.data_error("insert", "constraint"), 1);

        let op = f.operation("open_account", json!({"owner": "ada", "deposit": 100}));
        let err = f.coordinator.execute(&op, &test_context()).await.unwrap_err();
        let PersistenceError::TransactionStepFailure(failure) = err else {
            panic!("expected step failure, got {err:?}");
        };
        assert_eq!(failure.state, TransactionState::Compensated);
        assert_eq!(failure.state.to_string(), "COMPENSATED");
        assert_eq!(failure.steps[0].status, StepStatus::RolledBack);
        assert_eq!(failure.steps[1].status, StepStatus::Failed);
        assert_eq!(pg.calls("rollback"), 1);
        assert_eq!(pg.calls("delete"), 0);
        assert!(pg.rows("accounts").await.is_empty());
    }

    #[tokio::test]
    async fn commit_failure_reports_the_commit() {
        let f = fixture().await;
        let pg = mock(&f.factories, "pg");
        pg.fail_next("commit", pg.data_error("commit", "serialization failure"), 1);

        let op = f.operation("open_account", json!({"owner": "ada", "deposit": 1}));
        let err = f.coordinator.execute(&op, &test_context()).await.unwrap_err();
        let failure = err.transaction_failure().unwrap();
        assert_eq!(failure.failed_step, COMMIT_STEP);
        assert_eq!(failure.state, TransactionState::Compensated);
        assert!(failure.steps.iter().all(|s| s.status == StepStatus::RolledBack));
        assert!(pg.rows("accounts").await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn native_steps_stay_on_the_provider_that_opened_the_transaction() {
        let f = fixture().await;
        let pg = mock(&f.factories, "pg");
        let mongo = mock(&f.factories, "mongo");
        pg.set_delay(Some(Duration::from_millis(100)));

        let insert = |name: &str| {
            TransactionStep::new(
                name,
                StepAction::Insert {
                    table: "users".into(),
                    data: json!({"name": name}),
                },
            )
            .compensate_with(StepAction::Delete {
                table: "users".into(),
                id: format!("${{{name}.id}}"),
            })
        };
        let spec = TransactionSpec::new("three_users", vec![insert("a"), insert("b"), insert("c")]);

        let ctx = test_context();
        let evict = async {
            // Begin and step a are done; step b is in flight on pg.
            tokio::time::sleep(Duration::from_millis(250)).await;
            let down = PersistenceError::connection(
                "pg",
                polystore_core::TechnologyType::Relational,
                "reset",
            );
            for _ in 0..3 {
                f.registry.report_failure("pg", &down);
            }
        };
        let (result, ()) = tokio::join!(f.coordinator.execute(&spec, &ctx), evict);

        let err = result.unwrap_err();
        let failure = err.transaction_failure().unwrap();
        assert_eq!(failure.failed_step, "c");
        assert_eq!(failure.cause.kind(), "provider_unavailable");
        assert_eq!(failure.state, TransactionState::Compensated);
        assert!(
            failure.steps[..2]
                .iter()
                .all(|s| s.status == StepStatus::RolledBack && s.provider.as_deref() == Some("pg"))
        );
        assert_eq!(pg.calls("rollback"), 1);
        assert_eq!(mongo.calls("insert"), 0);
        assert!(mongo.rows("users").await.is_empty());
        assert!(pg.rows("users").await.is_empty());
    }

    #[tokio::test]
    async fn write_without_compensation_is_rejected_before_running() {
        let f = fixture().await;
        let spec = TransactionSpec::new(
            "bad",
            vec![TransactionStep::new(
                "create",
                StepAction::Insert {
                    table: "users".into(),
                    data: json!({"name": "x"}),
                },
            )],
        );
        let err = f.coordinator.execute(&spec, &test_context()).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(mock(&f.factories, "pg").calls("insert"), 0);
    }

    #[tokio::test]
    async fn read_steps_feed_later_steps_and_need_no_compensation() {
        let f = fixture().await;
        let mongo = mock(&f.factories, "mongo");
        mongo
            .insert(&test_context(), "profiles", Record::from_value(json!({"id": "p1", "user_id": "u1", "bio": "old"})))
            .await
            .unwrap();

        let spec = TransactionSpec::new(
            "retitle",
            vec![
                TransactionStep::new(
                    "find",
                    StepAction::Query {
                        table: "profiles".into(),
                        filter: Some(json!({"type": "compare", "field": "user_id", "op": "eq", "value": "${params.user}"})),
                        limit: Some(1),
                    },
                ),
                TransactionStep::new(
                    "retitle",
                    StepAction::Update {
                        table: "profiles".into(),
                        id: "${find.records.0.id}".into(),
                        data: json!({"bio": "new"}),
                    },
                )
                .compensate_with(StepAction::Update {
                    table: "profiles".into(),
                    id: "${find.records.0.id}".into(),
                    data: json!({"bio": "${find.records.0.bio}"}),
                }),
                TransactionStep::new(
                    "audit",
                    StepAction::Insert {
                        table: "events".into(),
                        data: json!({"kind": "retitle"}),
                    },
                )
                .compensate_with(StepAction::Delete {
                    table: "events".into(),
                    id: "${audit.id}".into(),
                }),
            ],
        )
        .with_parameters(json!({"user": "u1"}).as_object().cloned().unwrap());

        let lake = mock(&f.factories, "lake");
        lake.fail_next("insert:events", lake.data_error("insert", "partition offline"), 1);
        let err = f.coordinator.execute(&spec, &test_context()).await.unwrap_err();
        let failure = err.transaction_failure().unwrap();
        assert_eq!(failure.state, TransactionState::Compensated);
        assert_eq!(failure.steps[0].status, StepStatus::NothingToCompensate);
        assert_eq!(failure.steps[1].status, StepStatus::Compensated);
        assert_eq!(failure.steps[2].status, StepStatus::Failed);
        let profiles = mongo.rows("profiles").await;
        assert_eq!(profiles[0].field("bio"), Some(json!("old")));
    }
}
