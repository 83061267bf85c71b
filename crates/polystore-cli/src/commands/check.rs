//! Configuration check.

use std::path::Path;

use anyhow::Result;
use polystore_config::PlatformConfig;
use serde_json::json;

use crate::OutputFormat;
use crate::commands::print_json;
use crate::theme::Theme;

/// Report what a validated configuration declares.
///
/// Loading already validated it, so reaching this point means it passed.
pub(crate) fn run_check(
    config: &PlatformConfig,
    path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let source = path.map_or_else(|| "bundled sample".to_owned(), |p| p.display().to_string());

    if format == OutputFormat::Json {
        let tables: serde_json::Map<String, serde_json::Value> = config
            .tables
            .iter()
            .map(|(name, table)| (name.clone(), json!(table.candidates())))
            .collect();
        return print_json(&json!({
            "source": source,
            "valid": true,
            "providers": config.providers.iter().map(|p| &p.name).collect::<Vec<_>>(),
            "tables": tables,
            "queries": config.queries.keys().collect::<Vec<_>>(),
            "operations": config.operations.keys().collect::<Vec<_>>(),
        }));
    }

    println!("{}", Theme::header("Configuration check"));
    println!("{}", Theme::dimmed(&source));
    println!("{}", Theme::separator());
    println!("{}", Theme::success("configuration is valid"));
    println!();

    println!("{}", Theme::header("Providers"));
    for provider in &config.providers {
        println!("  {:<20} {}", provider.name, provider.technology);
    }

    println!("\n{}", Theme::header("Tables"));
    for (name, table) in &config.tables {
        let route: Vec<&str> = table.candidates().iter().map(|t| t.as_str()).collect();
        println!(
            "  {:<20} {}  {}",
            name,
            route.join(" -> "),
            Theme::dimmed(&format!("cache={}", table.cache.as_str()))
        );
    }

    if !config.queries.is_empty() {
        println!("\n{}", Theme::header("Named queries"));
        for (name, query) in &config.queries {
            println!("  {:<20} {} on {}", name, query.kind, query.table);
        }
    }

    if !config.operations.is_empty() {
        println!("\n{}", Theme::header("Operations"));
        for (name, operation) in &config.operations {
            let steps: Vec<&str> = operation.steps.iter().map(|s| s.name.as_str()).collect();
            println!("  {:<20} {}", name, steps.join(", "));
            if let Some(description) = &operation.description {
                println!("  {:<20} {}", "", Theme::dimmed(description));
            }
        }
    }
    Ok(())
}
