//! Test fixtures for common types.

use std::time::Duration;

use polystore_config::PlatformConfig;
use polystore_core::{ExecutionContext, Record};
use serde_json::json;

/// Platform configuration used across the test suites.
///
/// One provider per technology, `users` on relational with document and
/// wide-column fallbacks, a read-through `get_user_by_id` query, a saga
/// spanning relational and document (`register_user`) and a single-store
/// operation eligible for native transactions (`open_account`). Health checks
/// and backoff are shortened so tests do not wait on production timings.
pub const TEST_CONFIG_TOML: &str = r#"
[[providers]]
name = "pg"
technology = "relational"

[[providers]]
name = "mongo"
technology = "document"

[[providers]]
name = "wide"
technology = "wide_column"

[[providers]]
name = "kv"
technology = "cache"

[[providers]]
name = "vec"
technology = "vector"

[[providers]]
name = "fts"
technology = "search"

[[providers]]
name = "graph"
technology = "graph"

[[providers]]
name = "lake"
technology = "analytical"

[tables.users]
primary = "relational"
fallbacks = ["document", "wide_column"]
cache = "read_through"
ttl_secs = 60

[tables.profiles]
primary = "document"

[tables.accounts]
primary = "relational"

[tables.ledger]
primary = "relational"

[tables.sessions]
primary = "cache"

[tables.docs]
primary = "vector"

[tables.articles]
primary = "search"

[tables.follows]
primary = "graph"

[tables.events]
primary = "analytical"

[queries.get_user_by_id]
table = "users"
filter = { type = "compare", field = "id", op = "eq", value = "${params.id}" }
limit = 1
cache = "read_through"
ttl_secs = 60

[queries.users_by_status]
table = "users"
filter = { type = "compare", field = "status", op = "eq", value = "${params.status}" }
parameters = { status = "active" }
cache = "none"

[operations.register_user]
description = "Account row plus profile document"

[[operations.register_user.steps]]
name = "create_user"
action = { action = "insert", table = "users", data = { email = "${params.email}", name = "${params.name}" } }
compensation = { action = "delete", table = "users", id = "${create_user.id}" }

[[operations.register_user.steps]]
name = "create_profile"
action = { action = "insert", table = "profiles", data = { user_id = "${create_user.id}", display_name = "${params.name}" } }
compensation = { action = "delete", table = "profiles", id = "${create_profile.id}" }

[operations.open_account]
description = "Account and opening ledger entry in one relational transaction"

[[operations.open_account.steps]]
name = "account"
action = { action = "insert", table = "accounts", data = { owner = "${params.owner}", balance = 0 } }
compensation = { action = "delete", table = "accounts", id = "${account.id}" }

[[operations.open_account.steps]]
name = "entry"
action = { action = "insert", table = "ledger", data = { account = "${account.id}", amount = "${params.deposit}" } }
compensation = { action = "delete", table = "ledger", id = "${entry.id}" }

[registry]
health_interval_secs = 1
probe_timeout_ms = 200
failure_threshold = 3
max_retries = 3
backoff_initial_ms = 10
backoff_max_ms = 100

[executor]
max_in_flight = 4
default_timeout_ms = 5000
"#;

/// Parsed [`TEST_CONFIG_TOML`].
///
/// # Panics
///
/// Panics if the fixture stops parsing.
#[must_use]
pub fn test_config() -> PlatformConfig {
    PlatformConfig::from_toml_str(TEST_CONFIG_TOML).expect("test fixture config must parse")
}

/// A root context with a generous deadline.
#[must_use]
pub fn test_context() -> ExecutionContext {
    ExecutionContext::new().with_timeout(Duration::from_secs(5))
}

/// A user record.
#[must_use]
pub fn test_user(id: &str, name: &str) -> Record {
    Record::from_value(json!({
        "id": id,
        "name": name,
        "email": format!("{name}@example.com"),
        "status": "active",
    }))
}

/// A document with an embedding and searchable text.
#[must_use]
pub fn test_document(id: &str, body: &str, embedding: &[f64]) -> Record {
    Record::from_value(json!({
        "id": id,
        "body": body,
        "embedding": embedding,
    }))
}

/// A weighted, labelled graph edge.
#[must_use]
pub fn test_edge(from: &str, to: &str, weight: f64) -> Record {
    Record::from_value(json!({
        "id": format!("{from}->{to}"),
        "from": from,
        "to": to,
        "label": "follows",
        "weight": weight,
    }))
}
