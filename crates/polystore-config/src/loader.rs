//! Config file loading.
//!
//! Parsing is a convenience: callers that already hold typed configuration
//! construct [`PlatformConfig`] directly and only call
//! [`validate`](crate::validate::validate).

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::PlatformConfig;
use crate::validate;

/// Maximum config file size (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Sample deployment covering every technology.
pub const SAMPLE_TOML: &str = include_str!("sample.toml");

/// Parse and validate configuration from a TOML string.
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] for malformed TOML and
/// [`ConfigError::ValidationError`] if validation fails.
pub fn from_toml_str(content: &str) -> ConfigResult<PlatformConfig> {
    parse(content, "<string>")
}

/// Read, parse and validate a config file.
///
/// # Errors
///
/// Returns [`ConfigError::ReadError`] if the file cannot be read, otherwise as
/// [`from_toml_str`].
pub fn load_file(path: &Path) -> ConfigResult<PlatformConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::invalid(
            path.display().to_string(),
            format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        ));
    }

    let config = parse(&content, &path.display().to_string())?;
    info!(
        path = %path.display(),
        providers = config.providers.len(),
        tables = config.tables.len(),
        "loaded config"
    );
    Ok(config)
}

fn parse(content: &str, origin: &str) -> ConfigResult<PlatformConfig> {
    let config: PlatformConfig = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })?;
    debug!(origin, "parsed config, validating");
    validate::validate(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_core::{CacheStrategy, QueryKind, TechnologyType};
    use std::io::Write;

    #[test]
    fn sample_parses_and_validates() {
        let config = from_toml_str(SAMPLE_TOML).unwrap();
        assert_eq!(config.providers.len(), 8);
        let users = &config.tables["users"];
        assert_eq!(users.primary, TechnologyType::Relational);
        assert_eq!(users.fallbacks, vec![TechnologyType::Document]);
        assert_eq!(users.cache, CacheStrategy::ReadThrough);

        let q = &config.queries["get_user_by_id"];
        assert_eq!(q.kind, QueryKind::Select);
        assert_eq!(q.limit, Some(1));

        let op = &config.operations["register_user"];
        assert_eq!(op.steps.len(), 2);
        assert!(op.steps.iter().all(|s| s.compensation.is_some()));
    }

    #[test]
    fn credentials_are_not_leaked_by_debug() {
        let config = from_toml_str(SAMPLE_TOML).unwrap();
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("change-me"));
    }

    #[test]
    fn empty_config_is_valid() {
        let config = from_toml_str("").unwrap();
        assert!(config.providers.is_empty());
        assert_eq!(config.registry.health_interval_secs, 30);
        assert_eq!(config.registry.max_retries, 3);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = from_toml_str("[tables.users\nprimary =").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn load_file_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE_TOML.as_bytes()).unwrap();
        let config = load_file(file.path()).unwrap();
        assert_eq!(config.tables.len(), 9);
    }

    #[test]
    fn load_file_missing() {
        let result = load_file(Path::new("/nonexistent/polystore.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }
}
