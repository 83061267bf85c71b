//! Polystore Cache - fingerprint-keyed result cache.
//!
//! Reads are keyed by a deterministic [`fingerprint`] of the query. The
//! [`CacheLayer`] serves repeated reads, coalesces concurrent misses into one
//! fetch, and applies the per-query strategy (`read_through`,
//! `write_through`, `write_behind`, `refresh_ahead`) chosen by the router.
//! A miss is `None`, never an error.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod fingerprint;
mod layer;

pub use fingerprint::{fingerprint, normalize_table, record_key};
pub use layer::{CacheEntry, CacheLayer, CacheStats, Lookup, Refresher};
