//! Prelude module - commonly used types for convenient import.
//!
//! Use `use polystore_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{PersistenceError, PersistenceResult};

// Requests and records
pub use crate::{Filter, Operator, OrderBy, QueryKind, QuerySpec, Record};

// Provider contract
pub use crate::{
    ExecutionContext, Feature, Provider, ProviderConfig, ProviderFactory, RecordStream,
    TechnologyType,
};

// Transactions
pub use crate::{StepAction, TransactionSpec, TransactionStep};
