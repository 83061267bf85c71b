//! Per-operation observability callback.

use std::sync::Arc;
use std::time::Duration;

use crate::technology::TechnologyType;

/// One completed provider-facing operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationEvent {
    /// Operation name (`select`, `insert`, `vector_search`, ...).
    pub operation: String,
    /// Target table, if any.
    pub table: Option<String>,
    /// Technology that served it.
    pub technology: Option<TechnologyType>,
    /// Provider instance that served it.
    pub provider: Option<String>,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Whether it succeeded.
    pub success: bool,
    /// Records returned or modified.
    pub affected: usize,
    /// Whether the result came from the cache.
    pub from_cache: bool,
    /// Error kind on failure.
    pub error_kind: Option<&'static str>,
}

impl OperationEvent {
    /// Event for `operation` with everything else empty.
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            table: None,
            technology: None,
            provider: None,
            duration: Duration::ZERO,
            success: true,
            affected: 0,
            from_cache: false,
            error_kind: None,
        }
    }
}

/// Sink for [`OperationEvent`]s. Implementations must not block.
pub trait ObservabilityHook: Send + Sync {
    /// Record one event.
    fn record(&self, event: &OperationEvent);
}

/// Hook that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl ObservabilityHook for NoopHook {
    fn record(&self, _event: &OperationEvent) {}
}

/// Fans events out to several hooks in order.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<Arc<dyn ObservabilityHook>>,
}

impl HookChain {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook.
    #[must_use]
    pub fn with(mut self, hook: Arc<dyn ObservabilityHook>) -> Self {
        self.hooks.push(hook);
        self
    }
}

impl std::fmt::Debug for HookChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookChain")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl ObservabilityHook for HookChain {
    fn record(&self, event: &OperationEvent) {
        for hook in &self.hooks {
            hook.record(event);
        }
    }
}
