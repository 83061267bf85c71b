//! Per-call execution context: correlation, deadline and principal.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{PersistenceError, PersistenceResult};
use crate::provider::TransactionHandle;

/// Cross-cutting call metadata, passed by value down the call chain.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Trace identifier shared by every call derived from the same request.
    pub trace_id: Uuid,
    /// Identifier of this call.
    pub call_id: Uuid,
    /// Parent call if this is a sub-call.
    pub parent_id: Option<Uuid>,
    /// Authenticated principal, if any.
    pub principal: Option<String>,
    /// Absolute deadline. `None` means unbounded.
    pub deadline: Option<Instant>,
    /// When the call started.
    pub started_at: DateTime<Utc>,
    /// Operation being performed.
    pub operation: Option<String>,
    /// Native transaction the call runs inside, if any.
    pub transaction: Option<TransactionHandle>,
    /// Additional metadata.
    pub metadata: HashMap<String, String>,
}

impl ExecutionContext {
    /// A fresh root context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        let id = Uuid::new_v4();
        Self {
            trace_id: id,
            call_id: id,
            parent_id: None,
            principal: None,
            deadline: None,
            started_at: Utc::now(),
            operation: None,
            transaction: None,
            metadata: HashMap::new(),
        }
    }

    /// Set the deadline relative to now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Set an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the principal.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Add metadata.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Bind to a native transaction.
    #[must_use]
    pub fn with_transaction(mut self, handle: TransactionHandle) -> Self {
        self.transaction = Some(handle);
        self
    }

    /// Same context with the deadline lifted. Compensations run under this.
    #[must_use]
    pub fn without_deadline(&self) -> Self {
        let mut ctx = self.clone();
        ctx.deadline = None;
        ctx
    }

    /// Derive a sub-call context sharing trace, principal and deadline.
    #[must_use]
    pub fn child(&self, operation: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id,
            call_id: Uuid::new_v4(),
            parent_id: Some(self.call_id),
            principal: self.principal.clone(),
            deadline: self.deadline,
            started_at: Utc::now(),
            operation: Some(operation.into()),
            transaction: self.transaction.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Time left before the deadline. `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Milliseconds since the call started.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        u64::try_from(elapsed.num_milliseconds()).unwrap_or(0)
    }

    /// Tracing span carrying this context's identifiers.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            trace_id = %self.trace_id,
            call_id = %self.call_id,
            operation = self.operation.as_deref(),
            principal = self.principal.as_deref(),
        )
    }

    /// Run `fut` bounded by the deadline.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::Timeout`] naming `operation` if the deadline
    /// elapses first, or whatever error `fut` produces.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> PersistenceResult<T>
    where
        F: Future<Output = PersistenceResult<T>>,
    {
        match self.deadline {
            None => fut.await,
            Some(deadline) => {
                let started = Instant::now();
                tokio::time::timeout_at(deadline, fut).await.unwrap_or_else(|_| {
                    Err(PersistenceError::Timeout {
                        operation: operation.to_owned(),
                        elapsed_ms: u64::try_from(started.elapsed().as_millis())
                            .unwrap_or(u64::MAX),
                    })
                })
            },
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_inherits_trace_and_deadline() {
        let ctx = ExecutionContext::new()
            .with_principal("svc-a")
            .with_timeout(Duration::from_secs(5));
        let child = ctx.child("insert");
        assert_eq!(child.trace_id, ctx.trace_id);
        assert_eq!(child.parent_id, Some(ctx.call_id));
        assert_eq!(child.deadline, ctx.deadline);
        assert_eq!(child.principal.as_deref(), Some("svc-a"));
        assert_eq!(child.operation.as_deref(), Some("insert"));
    }

    #[test]
    fn without_deadline_is_unbounded() {
        let ctx = ExecutionContext::new().with_timeout(Duration::ZERO);
        assert!(ctx.is_expired());
        let lifted = ctx.without_deadline();
        assert!(!lifted.is_expired());
        assert!(lifted.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out() {
        let ctx = ExecutionContext::new().with_timeout(Duration::from_millis(50));
        let result: PersistenceResult<()> = ctx
            .run("query", async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(PersistenceError::Timeout { ref operation, .. }) if operation == "query"));
    }

    #[tokio::test]
    async fn run_passes_through_without_deadline() {
        let ctx = ExecutionContext::new();
        let value = ctx.run("query", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }
}
