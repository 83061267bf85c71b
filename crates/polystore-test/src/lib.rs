//! Polystore Test - shared test utilities.
//!
//! Mock providers, factories, an event-recording observability hook and
//! fixtures used by the other crates as a dev-dependency.
//!
//! ```rust,ignore
//! use polystore_test::{MockProvider, test_context};
//! use polystore_core::{Provider, TechnologyType};
//!
//! #[tokio::test]
//! async fn counts_calls() {
//!     let provider = MockProvider::new("pg", TechnologyType::Relational);
//!     provider.initialize().await.unwrap();
//!     provider.insert(&test_context(), "users", test_user("u1", "ada")).await.unwrap();
//!     assert_eq!(provider.calls("insert:users"), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
