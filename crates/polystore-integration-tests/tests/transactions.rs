//! Integration tests for multi-step operations.
//!
//! Steps spanning several technologies run as sagas: a failed step triggers
//! the compensations of the steps before it, in reverse order. Steps that all
//! land on one transactional store use its native transaction instead.

mod common;

use common::{PlatformHarness, params};
use polystore_core::{
    StepAction, StepStatus, TransactionSpec, TransactionState, TransactionStep,
};
use polystore_test::test_context;
use serde_json::json;

/// users (relational) -> profiles (document) -> sessions (cache).
fn three_step_signup() -> TransactionSpec {
    let steps = vec![
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
        }),
        TransactionStep::new(
            "create_profile",
            StepAction::Insert {
                table: "profiles".into(),
                data: json!({"user_id": "${create_user.id}"}),
            },
        )
        .compensate_with(StepAction::Delete {
            table: "profiles".into(),
            id: "${create_profile.id}".into(),
        }),
        TransactionStep::new(
            "open_session",
            StepAction::Insert {
                table: "sessions".into(),
                data: json!({"user_id": "${create_user.id}"}),
            },
        )
        .compensate_with(StepAction::Delete {
            table: "sessions".into(),
            id: "${open_session.id}".into(),
        }),
    ];
    TransactionSpec::new("signup", steps).with_parameters(params(json!({"email": "ada@example.com"})))
}

#[tokio::test]
async fn all_steps_commit_and_thread_outputs() {
    let harness = PlatformHarness::start_quiet().await;
    let result = harness
        .platform
        .execute_transaction(&three_step_signup(), &test_context())
        .await
        .unwrap();

    assert_eq!(result.state, TransactionState::Completed);
    assert!(!result.native);
    assert_eq!(result.affected_tables, vec!["users", "profiles", "sessions"]);
    assert!(result.steps.iter().all(|s| s.status == StepStatus::Committed));

    let user_id = result.outputs["create_user"]["id"].clone();
    let session = harness.provider("kv").rows("sessions").await;
    assert_eq!(session.len(), 1);
    assert_eq!(session[0].field("user_id"), Some(user_id));
}

#[tokio::test]
async fn failed_middle_step_compensates_the_first_and_skips_the_rest() {
    let harness = PlatformHarness::start_quiet().await;
    let mongo = harness.provider("mongo");
    mongo.fail_next("insert:profiles", mongo.data_error("insert", "duplicate key"), 1);

    let err = harness
        .platform
        .execute_transaction(&three_step_signup(), &test_context())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transaction_step_failure");

    let failure = err.transaction_failure().unwrap();
    assert_eq!(failure.state, TransactionState::Compensated);
    assert_eq!(failure.state.to_string(), "COMPENSATED");
    assert_eq!(failure.failed_step, "create_profile");
    assert_eq!(failure.failed_index, 1);
    assert_eq!(failure.cause.kind(), "provider");
    assert!(failure.cause.to_string().contains("duplicate key"));
    assert!(failure.unresolved.is_empty());

    let statuses: Vec<StepStatus> = failure.steps.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Compensated, StepStatus::Failed, StepStatus::Skipped]
    );

    let pg = harness.provider("pg");
    assert_eq!(pg.calls("insert:users"), 1);
    assert_eq!(pg.calls("delete:users"), 1);
    assert!(pg.rows("users").await.is_empty());
    assert_eq!(harness.provider("kv").calls("insert:sessions"), 0);
    assert!(harness.platform.pending_remediations().is_empty());
}

#[tokio::test]
async fn failed_compensation_is_reported_and_journaled() {
    let harness = PlatformHarness::start_quiet().await;
    let mongo = harness.provider("mongo");
    mongo.fail_next("insert:profiles", mongo.data_error("insert", "duplicate key"), 1);
    let pg = harness.provider("pg");
    pg.fail_always("delete:users", pg.data_error("delete", "row locked"));

    let err = harness
        .platform
        .execute_transaction(&three_step_signup(), &test_context())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "compensation_failed");
    assert!(err.is_operator_actionable());

    let failure = err.transaction_failure().unwrap();
    assert_eq!(failure.state.to_string(), "COMPENSATION_FAILED");
    assert_eq!(failure.unresolved.len(), 1);
    assert_eq!(failure.unresolved[0].step, "create_user");
    assert_eq!(failure.unresolved[0].table, "users");
    assert!(failure.cause.to_string().contains("duplicate key"));
    assert_eq!(failure.steps[0].status, StepStatus::CompensationFailed);
    assert_eq!(harness.provider("kv").calls("insert:sessions"), 0);

    // The user row is still there and the journal says so.
    assert_eq!(pg.rows("users").await.len(), 1);
    let pending = harness.platform.pending_remediations();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, failure.transaction_id);
    assert_eq!(pending[0].failed_step, "create_profile");
}

#[tokio::test]
async fn malformed_spec_runs_nothing() {
    let harness = PlatformHarness::start_quiet().await;
    let mut spec = three_step_signup();
    spec.steps[1].compensation = None;

    let err = harness
        .platform
        .execute_transaction(&spec, &test_context())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(harness.provider("pg").calls("insert:users"), 0);
}

#[tokio::test]
async fn single_store_operation_uses_a_native_transaction() {
    let harness = PlatformHarness::start_quiet().await;
    let result = harness
        .platform
        .execute_operation("open_account", params(json!({"owner": "ada", "deposit": 100})), &test_context())
        .await
        .unwrap();

    assert!(result.native);
    let pg = harness.provider("pg");
    assert_eq!(pg.calls("begin_transaction"), 1);
    assert_eq!(pg.calls("commit"), 1);
    assert_eq!(pg.rows("accounts").await.len(), 1);
    assert_eq!(pg.rows("ledger").await.len(), 1);
}

#[tokio::test]
async fn native_failure_rolls_back_every_step() {
    let harness = PlatformHarness::start_quiet().await;
    let pg = harness.provider("pg");
    pg.fail_next("insert:ledger", pg.data_error("insert", "check constraint"), 1);

    let err = harness
        .platform
        .execute_operation("open_account", params(json!({"owner": "ada", "deposit": -5})), &test_context())
        .await
        .unwrap_err();
    let failure = err.transaction_failure().unwrap();
    assert_eq!(failure.state, TransactionState::Compensated);
    assert_eq!(pg.calls("rollback"), 1);
    assert_eq!(pg.calls("delete:accounts"), 0);
    assert!(pg.rows("accounts").await.is_empty());
}
