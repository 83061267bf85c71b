#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
//! Typed configuration for the polystore router.
//!
//! A single [`PlatformConfig`] describes provider instances, per-table
//! technology assignment with fallbacks, named queries with cache settings,
//! named multi-step operations, and the registry, executor, cache and logging
//! knobs.
//!
//! # Usage
//!
//! ```rust,no_run
//! use polystore_config::PlatformConfig;
//!
//! let config = PlatformConfig::load(std::path::Path::new("polystore.toml")).unwrap();
//! println!("{} providers", config.providers.len());
//! ```

/// Configuration error types.
pub mod error;
/// Configuration file loading.
pub mod loader;
/// Configuration struct definitions.
pub mod types;
/// Configuration validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::SAMPLE_TOML;
pub use types::*;

impl PlatformConfig {
    /// Read, parse and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file is unreadable, malformed or
    /// fails validation.
    pub fn load(path: &std::path::Path) -> ConfigResult<Self> {
        loader::load_file(path)
    }

    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the text is malformed or fails validation.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        loader::from_toml_str(content)
    }

    /// Validate an already-constructed configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::ValidationError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        validate::validate(self)
    }
}
