//! Error taxonomy for routed persistence operations.
//!
//! Every variant names the table, technology or operation it concerns so a
//! caller can diagnose a failure without inspecting provider internals.

use thiserror::Error;

use crate::technology::TechnologyType;
use crate::transaction::TransactionFailure;

/// Errors produced by the routing, caching, execution and transaction layers.
#[derive(Debug, Clone, Error)]
pub enum PersistenceError {
    /// Fatal configuration problem (unknown technology type, malformed table
    /// mapping, missing factory). Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transient connectivity failure talking to a provider.
    #[error("connection error on provider '{provider}' ({technology}): {reason}")]
    Connection {
        /// Provider instance name.
        provider: String,
        /// Technology of the provider.
        technology: TechnologyType,
        /// Underlying failure.
        reason: String,
    },

    /// A provider stayed unreachable after the retry policy was exhausted.
    #[error("provider '{provider}' unavailable after {attempts} attempt(s): {reason}")]
    ProviderUnavailable {
        /// Provider instance name.
        provider: String,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure observed.
        reason: String,
    },

    /// No eligible technology could serve the request.
    #[error("no eligible technology for table '{table}': {reason}")]
    Routing {
        /// Table or collection the request targeted.
        table: String,
        /// Why routing failed.
        reason: String,
    },

    /// The request is malformed for its target.
    #[error("invalid {operation} on '{table}': {reason}")]
    Validation {
        /// Table or collection the request targeted.
        table: String,
        /// Operation that was rejected.
        operation: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A provider reported a data-level failure (constraint violation,
    /// duplicate key, unsupported payload).
    #[error("provider '{provider}' ({technology}) failed {operation}: {reason}")]
    Provider {
        /// Provider instance name.
        provider: String,
        /// Technology of the provider.
        technology: TechnologyType,
        /// Operation that failed.
        operation: String,
        /// Provider-reported reason.
        reason: String,
    },

    /// The addressed record does not exist.
    #[error("record '{id}' not found in '{table}'")]
    NotFound {
        /// Table or collection.
        table: String,
        /// Record identifier.
        id: String,
    },

    /// The call deadline elapsed before the operation finished.
    #[error("deadline exceeded during {operation} after {elapsed_ms}ms")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Time spent before giving up.
        elapsed_ms: u64,
    },

    /// A transaction step failed and every earlier step was compensated.
    #[error("{0}")]
    TransactionStepFailure(Box<TransactionFailure>),

    /// A transaction step failed and at least one compensation also failed.
    /// Requires manual remediation.
    #[error("manual remediation required: {0}")]
    CompensationFailed(Box<TransactionFailure>),
}

impl PersistenceError {
    /// Build a [`PersistenceError::Connection`].
    #[must_use]
    pub fn connection(
        provider: impl Into<String>,
        technology: TechnologyType,
        reason: impl Into<String>,
    ) -> Self {
        Self::Connection {
            provider: provider.into(),
            technology,
            reason: reason.into(),
        }
    }

    /// Build a [`PersistenceError::Routing`].
    #[must_use]
    pub fn routing(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Routing {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`PersistenceError::Validation`].
    #[must_use]
    pub fn validation(
        table: impl Into<String>,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            table: table.into(),
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`PersistenceError::Provider`].
    #[must_use]
    pub fn provider(
        provider: impl Into<String>,
        technology: TechnologyType,
        operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            technology,
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`PersistenceError::NotFound`].
    #[must_use]
    pub fn not_found(table: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Whether the retry policy applies. Only connection-class failures are
    /// retried; everything else propagates immediately.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }

    /// Whether an operator must repair inconsistent state by hand.
    #[must_use]
    pub fn is_operator_actionable(&self) -> bool {
        matches!(self, Self::CompensationFailed(_))
    }

    /// Transaction details for step and compensation failures.
    #[must_use]
    pub fn transaction_failure(&self) -> Option<&TransactionFailure> {
        match self {
            Self::TransactionStepFailure(f) | Self::CompensationFailed(f) => Some(f),
            _ => None,
        }
    }

    /// Short machine-readable kind, used as a metrics label.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Connection { .. } => "connection",
            Self::ProviderUnavailable { .. } => "provider_unavailable",
            Self::Routing { .. } => "routing",
            Self::Validation { .. } => "validation",
            Self::Provider { .. } => "provider",
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::TransactionStepFailure(_) => "transaction_step_failure",
            Self::CompensationFailed(_) => "compensation_failed",
        }
    }
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_transient() {
        let conn = PersistenceError::connection("pg", TechnologyType::Relational, "reset");
        assert!(conn.is_transient());

        let routing = PersistenceError::routing("users", "no healthy provider");
        assert!(!routing.is_transient());

        let validation = PersistenceError::validation("users", "vector_search", "unsupported");
        assert!(!validation.is_transient());

        let data = PersistenceError::provider(
            "pg",
            TechnologyType::Relational,
            "insert",
            "duplicate key",
        );
        assert!(!data.is_transient());
    }

    #[test]
    fn display_includes_context() {
        let err = PersistenceError::routing("users", "primary and fallbacks unhealthy");
        let msg = err.to_string();
        assert!(msg.contains("users"));
        assert!(msg.contains("unhealthy"));
        assert_eq!(err.kind(), "routing");
    }
}
