//! Named query command.

use anyhow::{Context, Result, bail};
use polystore_config::PlatformConfig;
use polystore_core::ExecutionContext;
use serde_json::{Map, Value, json};

use crate::OutputFormat;
use crate::commands::{parse_assignment, print_json, start_platform};
use crate::theme::Theme;

/// Arguments of `polystore query`.
pub(crate) struct QueryRequest {
    pub(crate) name: String,
    pub(crate) params: Vec<String>,
    pub(crate) seeds: Vec<String>,
    pub(crate) explain: bool,
}

fn parse_seed(raw: &str) -> Result<(String, Value)> {
    let (table, value) = parse_assignment(raw)?;
    if !value.is_object() {
        bail!("seed for '{table}' must be a JSON object");
    }
    Ok((table, value))
}

/// Seed the in-memory stores, then plan or run the named query.
pub(crate) async fn run_query(
    config: PlatformConfig,
    request: QueryRequest,
    format: OutputFormat,
) -> Result<()> {
    let params: Map<String, Value> = request
        .params
        .iter()
        .map(|raw| parse_assignment(raw))
        .collect::<Result<_>>()?;
    let seeds = request
        .seeds
        .iter()
        .map(|raw| parse_seed(raw))
        .collect::<Result<Vec<_>>>()?;

    let platform = start_platform(config).await?;
    let ctx = ExecutionContext::new().with_operation("cli");
    for (table, record) in seeds {
        platform
            .insert(&table, record, &ctx)
            .await
            .with_context(|| format!("seeding {table}"))?;
    }

    let spec = platform.named_query_spec(&request.name, params.clone())?;
    if request.explain {
        let plan = platform.explain(&spec, &ctx)?;
        platform.stop().await;
        let summary = json!({
            "query": request.name,
            "table": plan.table(),
            "kind": plan.spec.kind,
            "technology": plan.technology,
            "provider": plan.provider,
            "fallback": plan.fallback,
            "fallback_order": plan.fallback_order,
            "estimated_cost": plan.estimated_cost,
            "fingerprint": plan.fingerprint,
            "cache": plan.cache.strategy.as_str(),
            "cache_ttl_secs": plan.cache.ttl.as_secs(),
        });
        return match format {
            OutputFormat::Json => print_json(&summary),
            OutputFormat::Pretty => {
                println!("{}", Theme::header(&format!("Plan for {}", request.name)));
                println!("{}", Theme::separator());
                println!("  technology  {}", plan.technology);
                println!("  provider    {}", plan.provider);
                if plan.fallback {
                    println!("  {}", Theme::warning("primary technology unavailable, using a fallback"));
                }
                let order: Vec<&str> = plan.fallback_order.iter().map(|t| t.as_str()).collect();
                if order.is_empty() {
                    println!("  fallbacks   {}", Theme::dimmed("none available"));
                } else {
                    println!("  fallbacks   {}", order.join(" -> "));
                }
                println!("  cost        {}", plan.estimated_cost);
                println!(
                    "  cache       {} ({}s)",
                    plan.cache.strategy.as_str(),
                    plan.cache.ttl.as_secs()
                );
                Ok(())
            },
        };
    }

    let result = platform.execute_named_query(&request.name, params, &ctx).await;
    platform.stop().await;
    let result = result?;

    if format == OutputFormat::Json {
        return print_json(&result);
    }

    println!("{}", Theme::header(&request.name));
    println!("{}", Theme::separator());
    for record in &result.records {
        println!("  {}", serde_json::to_string(&record.to_flat_value())?);
    }
    if let Some(payload) = &result.payload {
        println!("  {payload}");
    }
    let served_by = result
        .provider
        .as_deref()
        .map_or_else(|| "cache".to_owned(), ToOwned::to_owned);
    println!(
        "{}",
        Theme::dimmed(&format!(
            "{} record(s) from {served_by} in {}ms",
            result.count, result.execution_time_ms
        ))
    );
    Ok(())
}
