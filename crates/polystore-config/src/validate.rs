//! Post-load configuration validation.
//!
//! Checks value ranges and cross-references between sections: tables must
//! point at technologies with a configured provider, queries at configured
//! tables, and operation steps must be well formed.

use std::collections::HashSet;

use polystore_core::TransactionSpec;

use crate::error::{ConfigError, ConfigResult};
use crate::types::PlatformConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 4] = ["pretty", "compact", "json", "full"];

/// Validate a deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &PlatformConfig) -> ConfigResult<()> {
    validate_providers(config)?;
    validate_tables(config)?;
    validate_queries(config)?;
    validate_operations(config)?;
    validate_limits(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_providers(config: &PlatformConfig) -> ConfigResult<()> {
    let mut names = HashSet::new();
    for (i, p) in config.providers.iter().enumerate() {
        if p.name.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("providers[{i}].name"),
                "provider name must not be empty",
            ));
        }
        if !names.insert(p.name.as_str()) {
            return Err(ConfigError::invalid(
                format!("providers[{i}].name"),
                format!("duplicate provider name '{}'", p.name),
            ));
        }
        if p.pool.max_connections == 0 || p.pool.min_connections > p.pool.max_connections {
            return Err(ConfigError::invalid(
                format!("providers[{i}].pool"),
                "max_connections must be positive and not below min_connections",
            ));
        }
    }
    Ok(())
}

fn validate_tables(config: &PlatformConfig) -> ConfigResult<()> {
    let configured = config.configured_technologies();
    for (name, table) in &config.tables {
        let mut seen = HashSet::new();
        for (i, tech) in table.candidates().into_iter().enumerate() {
            let field = if i == 0 {
                format!("tables.{name}.primary")
            } else {
                format!("tables.{name}.fallbacks")
            };
            if !seen.insert(tech) {
                return Err(ConfigError::invalid(
                    field,
                    format!("technology '{tech}' listed more than once"),
                ));
            }
            if !configured.contains(&tech) {
                return Err(ConfigError::invalid(
                    field,
                    format!("no provider configured for technology '{tech}'"),
                ));
            }
        }
        if table.cache.caches_reads() && table.ttl_secs == 0 {
            return Err(ConfigError::invalid(
                format!("tables.{name}.ttl_secs"),
                "cached tables need a positive ttl",
            ));
        }
    }
    Ok(())
}

fn validate_queries(config: &PlatformConfig) -> ConfigResult<()> {
    for (name, query) in &config.queries {
        if !config.tables.contains_key(&query.table) {
            return Err(ConfigError::invalid(
                format!("queries.{name}.table"),
                format!("unknown table '{}'", query.table),
            ));
        }
        if query.limit == Some(0) {
            return Err(ConfigError::invalid(
                format!("queries.{name}.limit"),
                "limit must be positive",
            ));
        }
        if query.ttl_secs == Some(0) {
            return Err(ConfigError::invalid(
                format!("queries.{name}.ttl_secs"),
                "ttl must be positive",
            ));
        }
    }
    Ok(())
}

fn validate_operations(config: &PlatformConfig) -> ConfigResult<()> {
    for (name, op) in &config.operations {
        TransactionSpec::new(name.clone(), op.steps.clone())
            .validate()
            .map_err(|e| ConfigError::invalid(format!("operations.{name}"), e.to_string()))?;
        for step in &op.steps {
            let actions = std::iter::once(&step.action).chain(step.compensation.as_ref());
            for action in actions {
                let table = action.table();
                if !table.contains("${") && !config.tables.contains_key(table) {
                    return Err(ConfigError::invalid(
                        format!("operations.{name}.steps.{}", step.name),
                        format!("unknown table '{table}'"),
                    ));
                }
            }
        }
    }
    Ok(())
}

fn validate_limits(config: &PlatformConfig) -> ConfigResult<()> {
    let r = &config.registry;
    if r.health_interval_secs == 0 {
        return Err(ConfigError::invalid(
            "registry.health_interval_secs",
            "must be positive",
        ));
    }
    if r.probe_timeout_ms == 0 {
        return Err(ConfigError::invalid(
            "registry.probe_timeout_ms",
            "must be positive",
        ));
    }
    if r.failure_threshold == 0 {
        return Err(ConfigError::invalid(
            "registry.failure_threshold",
            "must be positive",
        ));
    }
    if r.backoff_initial_ms > r.backoff_max_ms {
        return Err(ConfigError::invalid(
            "registry.backoff_initial_ms",
            format!(
                "initial backoff ({}ms) exceeds the cap ({}ms)",
                r.backoff_initial_ms, r.backoff_max_ms
            ),
        ));
    }
    if config.executor.max_in_flight == 0 {
        return Err(ConfigError::invalid(
            "executor.max_in_flight",
            "must be positive",
        ));
    }
    if config.cache.max_entries == 0 {
        return Err(ConfigError::invalid("cache.max_entries", "must be positive"));
    }
    if config.cache.refresh_interval_secs == 0 {
        return Err(ConfigError::invalid(
            "cache.refresh_interval_secs",
            "must be positive",
        ));
    }
    Ok(())
}

fn validate_logging(config: &PlatformConfig) -> ConfigResult<()> {
    let l = &config.logging;
    if !LOG_LEVELS.contains(&l.level.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::invalid(
            "logging.level",
            format!(
                "unknown level '{}'; expected one of: {}",
                l.level,
                LOG_LEVELS.join(", ")
            ),
        ));
    }
    if !LOG_FORMATS.contains(&l.format.as_str()) {
        return Err(ConfigError::invalid(
            "logging.format",
            format!(
                "unknown format '{}'; expected one of: {}",
                l.format,
                LOG_FORMATS.join(", ")
            ),
        ));
    }
    Ok(())
}
