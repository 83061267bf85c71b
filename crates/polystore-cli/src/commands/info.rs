//! Platform info command.

use anyhow::Result;
use polystore_config::PlatformConfig;

use crate::OutputFormat;
use crate::commands::{print_json, start_platform};
use crate::theme::Theme;

/// Print supported technologies, their capabilities and the configured
/// limits.
pub(crate) async fn run_info(config: PlatformConfig, format: OutputFormat) -> Result<()> {
    let platform = start_platform(config).await?;
    let info = platform.platform_info();
    platform.stop().await;

    if format == OutputFormat::Json {
        return print_json(&info);
    }

    println!("{} {}", Theme::header(info.name), Theme::dimmed(info.version));
    println!("{}", Theme::separator());

    for tech in &info.technologies {
        println!("{} {}", Theme::header(tech.technology.as_str()), tech.providers.join(", "));
        let kinds: Vec<&str> = tech.query_kinds.iter().map(|k| k.as_str()).collect();
        println!("  queries:  {}", kinds.join(", "));
        if !tech.features.is_empty() {
            let features: Vec<&str> = tech.features.iter().map(|f| f.as_str()).collect();
            println!("  features: {}", features.join(", "));
        }
    }

    let limits = &info.limits;
    println!("\n{}", Theme::header("Limits"));
    println!("  max in flight:     {}", limits.max_in_flight);
    println!("  default timeout:   {}ms", limits.default_timeout_ms);
    println!("  cache entries:     {}", limits.cache_max_entries);
    println!("  provider retries:  {}", limits.max_retries);
    Ok(())
}
