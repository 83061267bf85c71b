//! Polystore Providers - in-memory reference adapters.
//!
//! Every technology class gets the same [`MemoryProvider`] engine, shaped by
//! a per-technology capability profile:
//! - Relational stores accept native transactions
//! - Vector stores rank records by cosine similarity
//! - Search stores score records by term frequency
//! - Graph stores treat records as edges for traversal and shortest path
//! - Cache stores overwrite on insert; analytical stores are append-only
//!
//! These adapters back the CLI and the test suites and document the contract
//! real adapters must honour.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod aggregate;
mod factory;
mod graph;
mod params;
mod profile;
mod provider;
mod store;
mod text;
mod vector;

pub use factory::{MemoryProviderFactory, default_factories};
pub use profile::{Capabilities, capabilities};
pub use provider::MemoryProvider;
pub use vector::cosine_similarity;
