//! Writes and multi-step operations.

use polystore_core::{
    ExecutionContext, OperationResult, PersistenceError, PersistenceResult, QueryKind, Record,
    TransactionSpec,
};
use serde_json::{Map, Value};
use tracing::Instrument;

use super::PersistencePlatform;
use crate::remediation::RemediationEntry;

impl PersistencePlatform {
    /// Insert `data` into `table`. A string or numeric `id` field becomes the
    /// record id; otherwise one is generated.
    ///
    /// # Errors
    ///
    /// Returns a routing or validation error if the table cannot take writes,
    /// or the provider error.
    pub async fn insert(
        &self,
        table: &str,
        data: Value,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<Record> {
        let ctx = self.prepare(ctx, "insert");
        async {
            let plan = self.router.plan_write(table, QueryKind::Insert, &ctx)?;
            self.executor
                .insert(&plan, &ctx, Record::from_value(data))
                .await
        }
        .instrument(ctx.span())
        .await
    }

    /// Insert several records into `table` in one provider call.
    ///
    /// # Errors
    ///
    /// Same as [`PersistencePlatform::insert`].
    pub async fn insert_batch(
        &self,
        table: &str,
        rows: Vec<Value>,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<Vec<Record>> {
        let ctx = self.prepare(ctx, "insert_batch");
        async {
            let plan = self.router.plan_write(table, QueryKind::Insert, &ctx)?;
            let records = rows.into_iter().map(Record::from_value).collect();
            self.executor.insert_batch(&plan, &ctx, records).await
        }
        .instrument(ctx.span())
        .await
    }

    /// Merge `patch` into the record `id` of `table`.
    ///
    /// # Errors
    ///
    /// Same as [`PersistencePlatform::insert`]; a missing record is
    /// [`PersistenceError::NotFound`].
    pub async fn update(
        &self,
        table: &str,
        id: &str,
        patch: Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<Record> {
        let ctx = self.prepare(ctx, "update");
        async {
            let plan = self.router.plan_write(table, QueryKind::Update, &ctx)?;
            self.executor.update(&plan, &ctx, id, patch).await
        }
        .instrument(ctx.span())
        .await
    }

    /// Delete the record `id` of `table`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Same as [`PersistencePlatform::insert`].
    pub async fn delete(
        &self,
        table: &str,
        id: &str,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<bool> {
        let ctx = self.prepare(ctx, "delete");
        async {
            let plan = self.router.plan_write(table, QueryKind::Delete, &ctx)?;
            self.executor.delete(&plan, &ctx, id).await
        }
        .instrument(ctx.span())
        .await
    }

    /// Run the configured operation `name` with `params`.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unknown operation, otherwise see
    /// [`PersistencePlatform::execute_transaction`].
    pub async fn execute_operation(
        &self,
        name: &str,
        params: Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<OperationResult> {
        let operation = self.config.operations.get(name).ok_or_else(|| {
            PersistenceError::validation(name, "operation", "unknown operation")
        })?;
        let spec = TransactionSpec::new(name, operation.steps.clone()).with_parameters(params);
        self.execute_transaction(&spec, ctx).await
    }

    /// Run an ad-hoc multi-step transaction.
    ///
    /// # Errors
    ///
    /// - [`PersistenceError::Validation`] for a malformed spec; nothing runs.
    /// - [`PersistenceError::TransactionStepFailure`] when a step failed and
    ///   was fully undone.
    /// - [`PersistenceError::CompensationFailed`] when the undo failed; the
    ///   transaction is listed by
    ///   [`PersistencePlatform::pending_remediations`].
    pub async fn execute_transaction(
        &self,
        spec: &TransactionSpec,
        ctx: &ExecutionContext,
    ) -> PersistenceResult<OperationResult> {
        let ctx = self.prepare(ctx, "execute_transaction");
        self.coordinator
            .execute(spec, &ctx)
            .instrument(ctx.span())
            .await
    }

    /// Failed transactions awaiting manual remediation.
    #[must_use]
    pub fn pending_remediations(&self) -> Vec<RemediationEntry> {
        self.coordinator.journal().pending()
    }

    /// Mark transaction `id` as remediated.
    pub fn acknowledge_remediation(&self, id: &str) -> bool {
        self.coordinator.journal().acknowledge(id)
    }
}
