//! Health command.

use anyhow::Result;
use polystore_config::PlatformConfig;
use polystore_core::HealthState;

use crate::OutputFormat;
use crate::commands::{print_json, start_platform};
use crate::theme::Theme;

/// Connect every provider, probe it once and report.
pub(crate) async fn run_health(config: PlatformConfig, format: OutputFormat) -> Result<()> {
    let platform = start_platform(config).await?;
    platform.registry().check_all().await;
    let health = platform.get_health_status();
    platform.stop().await;

    if format == OutputFormat::Json {
        return print_json(&health);
    }

    println!("{}", Theme::header("Provider health"));
    println!("{}", Theme::separator());
    for provider in &health.providers {
        let latency = provider
            .health
            .last_latency_ms
            .map_or_else(String::new, |ms| format!(" ({ms}ms)"));
        println!(
            "  {} {:<20} {}{}",
            Theme::health(provider.health.state),
            provider.name,
            provider.technology,
            latency
        );
        if let Some(error) = &provider.health.last_error {
            println!("       {}", Theme::dimmed(error));
        }
    }
    for failed in &health.failed_registrations {
        println!("{}", Theme::error(&format!("{} never connected: {}", failed.name, failed.error)));
    }

    println!();
    let summary = match health.status {
        HealthState::Healthy => Theme::success("all technologies available"),
        HealthState::Degraded => Theme::warning("some providers are unavailable"),
        HealthState::Unhealthy | HealthState::Failed => Theme::error("no technology is available"),
    };
    println!("{summary}");
    println!("{}", Theme::dimmed(&format!("uptime {}s", health.uptime_secs)));
    Ok(())
}
