//! CLI theme and styling.

use colored::Colorize;
use polystore_core::HealthState;

/// CLI theme configuration.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format an error message.
    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format a dimmed message.
    pub(crate) fn dimmed(text: &str) -> String {
        format!("{}", text.dimmed())
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(50).dimmed().to_string()
    }

    /// Colored short label for a health state.
    pub(crate) fn health(state: HealthState) -> String {
        match state {
            HealthState::Healthy => "OK".green().to_string(),
            HealthState::Degraded => "WARN".yellow().to_string(),
            HealthState::Unhealthy => "FAIL".red().to_string(),
            HealthState::Failed => "DOWN".red().bold().to_string(),
        }
    }
}
