//! CLI command implementations.

pub(crate) mod check;
pub(crate) mod health;
pub(crate) mod info;
pub(crate) mod query;

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use polystore_config::PlatformConfig;
use polystore_engine::PersistencePlatform;
use polystore_telemetry::{LogConfig, LogFormat, setup_logging};
use serde::Serialize;
use serde_json::Value;

/// Load `path`, or the bundled sample when no path is given.
pub(crate) fn load_config(path: Option<&Path>) -> Result<PlatformConfig> {
    match path {
        Some(path) => PlatformConfig::load(path)
            .with_context(|| format!("loading {}", path.display())),
        None => PlatformConfig::from_toml_str(polystore_config::SAMPLE_TOML)
            .context("parsing the bundled sample configuration"),
    }
}

/// Install the tracing subscriber from the `[logging]` section.
pub(crate) fn init_logging(config: &PlatformConfig, verbose: bool) -> Result<()> {
    let logging = &config.logging;
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let format = LogFormat::from_str(&logging.format)?;
    let log_config = LogConfig::new(level)
        .with_format(format)
        .with_directives(logging.directives.iter().cloned());
    setup_logging(&log_config)?;
    Ok(())
}

/// Build and start a platform over the in-memory adapters.
pub(crate) async fn start_platform(config: PlatformConfig) -> Result<PersistencePlatform> {
    let platform = PersistencePlatform::builder(config)
        .with_factories(polystore_providers::default_factories())
        .build()?;
    platform.start().await?;
    Ok(platform)
}

/// Split `key=value`. The value is parsed as JSON when possible and kept as
/// a string otherwise.
pub(crate) fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("expected KEY=VALUE, got '{raw}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("empty key in '{raw}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_owned()));
    Ok((key.to_owned(), value))
}

/// Print `value` as pretty JSON.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
