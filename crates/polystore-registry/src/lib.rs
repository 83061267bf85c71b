//! Polystore Registry - provider lifecycle and health.
//!
//! The [`ProviderRegistry`] creates providers through per-technology
//! factories, keeps at most one live instance per name, and runs a periodic
//! health-check loop that evicts failing providers from routing and
//! reconnects them with capped exponential backoff.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use polystore_config::RegistrySection;
//! use polystore_core::{ProviderConfig, TechnologyType};
//! use polystore_registry::ProviderRegistry;
//!
//! # async fn example(factory: Arc<dyn polystore_core::ProviderFactory>) -> polystore_core::PersistenceResult<()> {
//! let registry = Arc::new(ProviderRegistry::new(RegistrySection::default()));
//! registry.register_factory(factory);
//! registry.register(ProviderConfig::new("pg", TechnologyType::Relational)).await?;
//! registry.start();
//!
//! assert!(registry.get("pg").is_some());
//! registry.stop().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod health;
mod registry;

pub use health::ProbeOutcome;
pub use registry::{FailedRegistration, ProviderRegistry, ProviderStatus};
