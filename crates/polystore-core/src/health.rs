//! Provider liveness as seen by the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Provider health state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Probes succeed.
    #[default]
    Healthy,
    /// Recent probes failed but the failure threshold is not reached.
    Degraded,
    /// Failure threshold reached; reconnection in progress.
    Unhealthy,
    /// Reconnection budget exhausted. Stays failed until re-registered.
    Failed,
}

impl HealthState {
    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current liveness of one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    /// State.
    pub state: HealthState,
    /// Last probe time.
    pub last_checked: Option<DateTime<Utc>>,
    /// Failed probes since the last success.
    pub consecutive_failures: u32,
    /// Reconnection attempts since the last success.
    pub reconnect_attempts: u32,
    /// Last probe or reconnection error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Last successful probe latency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u64>,
    /// Monotonic time of the last reconnection attempt.
    #[serde(skip)]
    pub last_reconnect_at: Option<Instant>,
}

impl HealthRecord {
    /// Record for a freshly initialised provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: HealthState::Healthy,
            last_checked: None,
            consecutive_failures: 0,
            reconnect_attempts: 0,
            last_error: None,
            last_latency_ms: None,
            last_reconnect_at: None,
        }
    }

    /// Whether the router may send traffic to this provider.
    #[must_use]
    pub fn is_routable(&self, failure_threshold: u32) -> bool {
        match self.state {
            HealthState::Healthy | HealthState::Degraded => {
                self.consecutive_failures < failure_threshold
            },
            HealthState::Unhealthy | HealthState::Failed => false,
        }
    }

    /// Apply a successful probe. A `Failed` provider stays failed.
    pub fn record_success(&mut self, latency_ms: u64) {
        self.last_checked = Some(Utc::now());
        self.last_latency_ms = Some(latency_ms);
        if self.state == HealthState::Failed {
            return;
        }
        self.state = HealthState::Healthy;
        self.consecutive_failures = 0;
        self.reconnect_attempts = 0;
        self.last_error = None;
    }

    /// Apply a failed probe and return the new consecutive failure count.
    pub fn record_failure(&mut self, error: impl Into<String>, failure_threshold: u32) -> u32 {
        self.last_checked = Some(Utc::now());
        self.last_error = Some(error.into());
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.state != HealthState::Failed {
            self.state = if self.consecutive_failures >= failure_threshold {
                HealthState::Unhealthy
            } else {
                HealthState::Degraded
            };
        }
        self.consecutive_failures
    }

    /// Mark permanently failed.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.state = HealthState::Failed;
        self.last_error = Some(error.into());
    }
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self::new()
    }
}
