//! Multi-step transaction descriptions and their outcomes.
//!
//! A [`TransactionSpec`] is an ordered list of steps, each with a forward
//! action and an optional compensating action. The coordinator in the engine
//! crate executes them; this module only defines the shapes and their
//! structural validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{PersistenceError, PersistenceResult};
use crate::query::Filter;
use crate::template::{self, TemplateScope};

/// Scope key under which caller parameters are visible to templates.
pub const PARAMS_SCOPE: &str = "params";

/// One data operation inside a step. String fields and payloads may contain
/// `${...}` placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    /// Insert a record. The stored record becomes the step output.
    Insert {
        /// Target table.
        table: String,
        /// Record payload.
        data: Value,
    },
    /// Patch a record by id.
    Update {
        /// Target table.
        table: String,
        /// Record id.
        id: String,
        /// Patch payload.
        data: Value,
    },
    /// Delete a record by id.
    Delete {
        /// Target table.
        table: String,
        /// Record id.
        id: String,
    },
    /// Read records. Output is `{"records": [...], "count": n}`.
    Query {
        /// Target table.
        table: String,
        /// Filter, as a JSON-encoded [`Filter`].
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Value>,
        /// Row cap.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    /// Technology-specific operation.
    Specific {
        /// Target table.
        table: String,
        /// Operation name passed to the provider.
        operation: String,
        /// Operation parameters.
        #[serde(default)]
        params: Value,
    },
}

impl StepAction {
    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::Query { table, .. }
            | Self::Specific { table, .. } => table,
        }
    }

    /// Short name for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Query { .. } => "query",
            Self::Specific { .. } => "specific",
        }
    }

    /// Whether the action mutates data and therefore needs a compensation.
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::Insert { .. } | Self::Update { .. } | Self::Delete { .. }
        )
    }

    /// Substitute placeholders against `scope`.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the table if a placeholder does not
    /// resolve or a rendered filter is malformed.
    pub fn render(&self, scope: &TemplateScope) -> PersistenceResult<Self> {
        let table = self.table();
        let fail = |e: template::UnresolvedPlaceholder| {
            PersistenceError::validation(table, self.kind(), e.to_string())
        };
        Ok(match self {
            Self::Insert { table, data } => Self::Insert {
                table: template::render_text(table, scope).map_err(fail)?,
                data: template::render(data, scope).map_err(fail)?,
            },
            Self::Update { table, id, data } => Self::Update {
                table: template::render_text(table, scope).map_err(fail)?,
                id: template::render_text(id, scope).map_err(fail)?,
                data: template::render(data, scope).map_err(fail)?,
            },
            Self::Delete { table, id } => Self::Delete {
                table: template::render_text(table, scope).map_err(fail)?,
                id: template::render_text(id, scope).map_err(fail)?,
            },
            Self::Query {
                table,
                filter,
                limit,
            } => Self::Query {
                table: template::render_text(table, scope).map_err(fail)?,
                filter: filter
                    .as_ref()
                    .map(|f| template::render(f, scope))
                    .transpose()
                    .map_err(fail)?,
                limit: *limit,
            },
            Self::Specific {
                table,
                operation,
                params,
            } => Self::Specific {
                table: template::render_text(table, scope).map_err(fail)?,
                operation: operation.clone(),
                params: template::render(params, scope).map_err(fail)?,
            },
        })
    }

    /// Decode the filter of a `Query` action.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the filter JSON is not a valid [`Filter`].
    pub fn decoded_filter(&self) -> PersistenceResult<Option<Filter>> {
        match self {
            Self::Query {
                table,
                filter: Some(raw),
                ..
            } => serde_json::from_value(raw.clone()).map(Some).map_err(|e| {
                PersistenceError::validation(table, "query", format!("malformed filter: {e}"))
            }),
            _ => Ok(None),
        }
    }
}

/// One step: a forward action and the action that undoes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStep {
    /// Step name, unique within the transaction. Later steps reference this
    /// step's output as `${name.field}`.
    pub name: String,
    /// Forward action.
    pub action: StepAction,
    /// Compensating action. Required for writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<StepAction>,
}

impl TransactionStep {
    /// A step without compensation.
    #[must_use]
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            compensation: None,
        }
    }

    /// Set the compensation.
    #[must_use]
    pub fn compensate_with(mut self, compensation: StepAction) -> Self {
        self.compensation = Some(compensation);
        self
    }
}

/// An ordered multi-step operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSpec {
    /// Transaction id.
    #[serde(default = "new_transaction_id")]
    pub id: String,
    /// Operation name, for logs and remediation.
    pub name: String,
    /// Steps in execution order.
    pub steps: Vec<TransactionStep>,
    /// Caller parameters, visible to templates as `${params.*}`.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

fn new_transaction_id() -> String {
    Uuid::new_v4().to_string()
}

impl TransactionSpec {
    /// A transaction named `name` with a fresh id.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<TransactionStep>) -> Self {
        Self {
            id: new_transaction_id(),
            name: name.into(),
            steps,
            parameters: Map::new(),
        }
    }

    /// Set caller parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Structural checks.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty step list, duplicate or
    /// reserved step names, or a write step without a compensation.
    pub fn validate(&self) -> PersistenceResult<()> {
        if self.steps.is_empty() {
            return Err(PersistenceError::validation(
                &self.name,
                "transaction",
                "no steps",
            ));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name == PARAMS_SCOPE {
                return Err(PersistenceError::validation(
                    step.action.table(),
                    "transaction",
                    format!("step name '{PARAMS_SCOPE}' is reserved"),
                ));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(PersistenceError::validation(
                    step.action.table(),
                    "transaction",
                    format!("duplicate step name '{}'", step.name),
                ));
            }
            if step.action.is_write() && step.compensation.is_none() {
                return Err(PersistenceError::validation(
                    step.action.table(),
                    "transaction",
                    format!("write step '{}' declares no compensation", step.name),
                ));
            }
        }
        Ok(())
    }

    /// Initial template scope: caller parameters under `params`.
    #[must_use]
    pub fn initial_scope(&self) -> TemplateScope {
        let mut scope = TemplateScope::new();
        scope.insert(
            PARAMS_SCOPE.to_owned(),
            Value::Object(self.parameters.clone()),
        );
        scope
    }
}

/// Transaction state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransactionState {
    /// Not started.
    Pending,
    /// Running the forward action of step `step` (0-indexed).
    Executing {
        /// Step index.
        step: usize,
    },
    /// Every step succeeded.
    Completed,
    /// Running the compensation of step `step`.
    Compensating {
        /// Step index.
        step: usize,
    },
    /// Every completed step was undone, by compensation or by a native
    /// rollback.
    Compensated,
    /// At least one compensation failed.
    CompensationFailed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Executing { step } => write!(f, "EXECUTING({step})"),
            Self::Completed => f.write_str("COMPLETED"),
            Self::Compensating { step } => write!(f, "COMPENSATING({step})"),
            Self::Compensated => f.write_str("COMPENSATED"),
            Self::CompensationFailed => f.write_str("COMPENSATION_FAILED"),
        }
    }
}

/// What happened to one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Forward action committed and was kept.
    Committed,
    /// Forward action failed.
    Failed,
    /// Forward action committed and was undone.
    Compensated,
    /// Forward action committed and its compensation failed.
    CompensationFailed,
    /// Read-only step, nothing to undo.
    NothingToCompensate,
    /// Never ran.
    Skipped,
    /// Undone by a native rollback.
    RolledBack,
}

/// Per-step report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    /// Step name.
    pub name: String,
    /// Target table.
    pub table: String,
    /// Final status.
    pub status: StepStatus,
    /// Provider that served the forward action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Forward action output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Forward or compensation error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepReport {
    /// Report for a step that has not run.
    #[must_use]
    pub fn skipped(step: &TransactionStep) -> Self {
        Self {
            name: step.name.clone(),
            table: step.action.table().to_owned(),
            status: StepStatus::Skipped,
            provider: None,
            output: None,
            error: None,
        }
    }
}

/// A committed step whose compensation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedStep {
    /// Step name.
    pub step: String,
    /// Table left inconsistent.
    pub table: String,
    /// Compensation error.
    pub error: String,
}

/// Details of a failed transaction.
#[derive(Debug, Clone)]
pub struct TransactionFailure {
    /// Transaction id.
    pub transaction_id: String,
    /// Operation name.
    pub name: String,
    /// Final state: `Compensated` or `CompensationFailed`. Step reports say
    /// whether the undo was a compensation or a native rollback.
    pub state: TransactionState,
    /// Name of the step whose forward action failed.
    pub failed_step: String,
    /// Index of that step.
    pub failed_index: usize,
    /// The original error.
    pub cause: Box<PersistenceError>,
    /// Report for every step, in declared order.
    pub steps: Vec<StepReport>,
    /// Steps whose compensation failed, in compensation order.
    pub unresolved: Vec<UnresolvedStep>,
}

impl TransactionFailure {
    /// Names of steps that were undone.
    #[must_use]
    pub fn compensated_steps(&self) -> Vec<&str> {
        self.steps_with(StepStatus::Compensated)
    }

    /// Names of steps that never ran.
    #[must_use]
    pub fn skipped_steps(&self) -> Vec<&str> {
        self.steps_with(StepStatus::Skipped)
    }

    fn steps_with(&self, status: StepStatus) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == status)
            .map(|s| s.name.as_str())
            .collect()
    }
}

impl fmt::Display for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transaction '{}' ({}) failed at step '{}' [{}]: {}",
            self.name, self.transaction_id, self.failed_step, self.state, self.cause
        )?;
        if !self.unresolved.is_empty() {
            let names: Vec<&str> = self.unresolved.iter().map(|u| u.step.as_str()).collect();
            write!(f, "; uncompensated steps: {}", names.join(", "))?;
        }
        Ok(())
    }
}

/// Successful transaction result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Transaction id.
    pub transaction_id: String,
    /// Operation name.
    pub name: String,
    /// Always `Completed`.
    pub state: TransactionState,
    /// Step outputs keyed by step name.
    pub outputs: Map<String, Value>,
    /// Per-step reports.
    pub steps: Vec<StepReport>,
    /// Distinct tables touched, in first-touch order.
    pub affected_tables: Vec<String>,
    /// Whether a native transaction was used.
    pub native: bool,
    /// Wall-clock time.
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert_user() -> TransactionStep {
        TransactionStep::new(
            "create_user",
            StepAction::Insert {
                table: "users".into(),
                data: json!({"email": "${params.email}"}),
            },
        )
        .compensate_with(StepAction::Delete {
            table: "users".into(),
            id: "${create_user.id}".into(),
        })
    }

    #[test]
    fn write_steps_need_compensation() {
        let step = TransactionStep::new(
            "create",
            StepAction::Insert {
                table: "users".into(),
                data: json!({}),
            },
        );
        let spec = TransactionSpec::new("signup", vec![step]);
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("no compensation"));
    }

    #[test]
    fn duplicate_and_reserved_names_rejected() {
        let spec = TransactionSpec::new("signup", vec![insert_user(), insert_user()]);
        assert!(spec.validate().is_err());

        let mut reserved = insert_user();
        reserved.name = PARAMS_SCOPE.into();
        assert!(TransactionSpec::new("signup", vec![reserved]).validate().is_err());

        assert!(TransactionSpec::new("signup", vec![insert_user()]).validate().is_ok());
    }

    #[test]
    fn render_resolves_params_and_outputs() {
        let spec = TransactionSpec::new("signup", vec![insert_user()])
            .with_parameters(json!({"email": "a@b.c"}).as_object().unwrap().clone());
        let mut scope = spec.initial_scope();
        let forward = spec.steps[0].action.render(&scope).unwrap();
        assert_eq!(
            forward,
            StepAction::Insert {
                table: "users".into(),
                data: json!({"email": "a@b.c"})
            }
        );

        scope.insert("create_user".into(), json!({"id": "u-9"}));
        let undo = spec.steps[0]
            .compensation
            .as_ref()
            .unwrap()
            .render(&scope)
            .unwrap();
        assert_eq!(
            undo,
            StepAction::Delete {
                table: "users".into(),
                id: "u-9".into()
            }
        );
    }

    #[test]
    fn step_action_serde_is_tagged() {
        let action: StepAction = serde_json::from_value(json!({
            "action": "query",
            "table": "orders",
            "filter": {"type": "compare", "field": "user_id", "op": "eq", "value": "${params.uid}"},
            "limit": 5
        }))
        .unwrap();
        assert_eq!(action.table(), "orders");
        assert!(!action.is_write());
    }

    #[test]
    fn state_display_uses_uppercase_names() {
        assert_eq!(TransactionState::Compensated.to_string(), "COMPENSATED");
        assert_eq!(
            TransactionState::Executing { step: 2 }.to_string(),
            "EXECUTING(2)"
        );
    }
}
