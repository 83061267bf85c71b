//! Polystore Engine - routing, execution and transactions.
//!
//! This crate turns requests into work against registered providers:
//!
//! - [`Router`] picks a technology for each table by static priority and
//!   applies technology-aware rewrites
//! - [`Executor`] runs plans with deadlines, retries, caching and
//!   per-operation events
//! - [`merge`] combines results from several technologies
//! - [`TransactionCoordinator`] runs multi-step operations natively or as
//!   sagas with compensation
//! - [`PersistencePlatform`] wires all of the above behind one API
//!
//! # Example
//!
//! ```rust,no_run
//! use polystore_config::PlatformConfig;
//! use polystore_core::{ExecutionContext, QuerySpec};
//! use polystore_engine::PersistencePlatform;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PlatformConfig::load(std::path::Path::new("polystore.toml"))?;
//! let platform = PersistencePlatform::builder(config)
//!     .with_factories(polystore_providers::default_factories())
//!     .build()?;
//! platform.start().await?;
//!
//! let ctx = ExecutionContext::new();
//! platform.insert("users", serde_json::json!({"id": "u1", "name": "Ada"}), &ctx).await?;
//! let result = platform.execute_raw_query(&QuerySpec::select("users"), &ctx).await?;
//! assert_eq!(result.count, 1);
//!
//! platform.stop().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod coordinator;
mod executor;
pub mod merge;
mod plan;
mod platform;
mod remediation;
mod router;

#[cfg(test)]
mod testing;

pub use coordinator::TransactionCoordinator;
pub use executor::{Executor, HybridResult, QueryResult};
pub use plan::{ExecutionPlan, MergeStrategy, MultiPlan};
pub use platform::{
    PersistencePlatform, PlatformBuilder, PlatformHealth, PlatformInfo, PlatformLimits,
    PlatformMetrics, TechnologyInfo,
};
pub use remediation::{RemediationEntry, RemediationJournal};
pub use router::{Route, Router};
