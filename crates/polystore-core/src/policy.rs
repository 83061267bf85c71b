//! Per-query cache policy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the cache participates in a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStrategy {
    /// Bypass the cache entirely.
    #[default]
    None,
    /// Check the cache first, populate on miss.
    ReadThrough,
    /// Update the cache synchronously on write.
    WriteThrough,
    /// Update the cache after the write returns, fire-and-forget.
    WriteBehind,
    /// Read-through, and re-populate entries shortly before expiry if they
    /// were read in the preceding window.
    RefreshAhead,
}

impl CacheStrategy {
    /// Whether reads consult and populate the cache.
    #[must_use]
    pub const fn caches_reads(self) -> bool {
        !matches!(self, Self::None)
    }

    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ReadThrough => "read_through",
            Self::WriteThrough => "write_through",
            Self::WriteBehind => "write_behind",
            Self::RefreshAhead => "refresh_ahead",
        }
    }
}

impl fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy, TTL and invalidation tags resolved for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Strategy.
    pub strategy: CacheStrategy,
    /// Entry lifetime.
    pub ttl: Duration,
    /// Tags attached to populated entries.
    pub tags: Vec<String>,
}

impl CachePolicy {
    /// No caching.
    #[must_use]
    pub fn bypass() -> Self {
        Self {
            strategy: CacheStrategy::None,
            ttl: Duration::ZERO,
            tags: Vec::new(),
        }
    }

    /// Policy with the given strategy and TTL.
    #[must_use]
    pub fn new(strategy: CacheStrategy, ttl: Duration) -> Self {
        Self {
            strategy,
            ttl,
            tags: Vec::new(),
        }
    }

    /// Attach tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Whether this policy caches reads with a usable lifetime.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.strategy.caches_reads() && !self.ttl.is_zero()
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::bypass()
    }
}
