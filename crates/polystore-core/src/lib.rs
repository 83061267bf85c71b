//! Polystore Core - data model and contracts for the federated persistence
//! router.
//!
//! This crate provides:
//! - The technology vocabulary (`TechnologyType`, `QueryKind`, `Feature`)
//! - Technology-agnostic requests (`QuerySpec`, `Filter`) and search queries
//! - The `Provider` contract every storage adapter implements
//! - `ExecutionContext` carrying trace id, deadline and principal
//! - Multi-step `TransactionSpec` shapes and their outcomes
//! - The `PersistenceError` taxonomy
//! - Retry utilities with capped exponential backoff

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod context;
pub mod error;
pub mod health;
pub mod observe;
pub mod policy;
pub mod provider;
pub mod query;
pub mod record;
pub mod retry;
pub mod search;
pub mod technology;
pub mod template;
pub mod transaction;

pub use context::ExecutionContext;
pub use error::{PersistenceError, PersistenceResult};
pub use health::{HealthRecord, HealthState};
pub use observe::{HookChain, NoopHook, ObservabilityHook, OperationEvent};
pub use policy::{CachePolicy, CacheStrategy};
pub use provider::{
    Credentials, FieldSchema, PoolConfig, Provider, ProviderConfig, ProviderFactory,
    ProviderHealth, ProviderMetrics, RecordStream, TableSchema, TransactionHandle,
};
pub use query::{Filter, Operator, OrderBy, QuerySpec};
pub use record::Record;
pub use retry::{RetryOutcome, RetryPolicy, retry};
pub use search::{
    CrossTechnologyQuery, Direction, GraphPath, GraphTraversalQuery, HybridSearchQuery,
    HybridWeights, ScoredRecord, SetMerge, ShortestPathQuery, ShortestPathResponse,
    TextSearchQuery, TextSearchResponse, TraversalResult, TraversedNode, VectorMatch,
    VectorSearchQuery, VectorSearchResponse, decode_response,
};
pub use technology::{DataType, Feature, QueryKind, TechnologyType};
pub use transaction::{
    OperationResult, StepAction, StepReport, StepStatus, TransactionFailure, TransactionSpec,
    TransactionState, TransactionStep, UnresolvedStep,
};
