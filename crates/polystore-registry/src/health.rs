//! Health probing and reconnection.
//!
//! Every tick probes all providers concurrently. Reconnection starts only once
//! a provider has left rotation (`failure_threshold` consecutive failures), so
//! calls still routed to a degraded provider never see it torn down under
//! them. Attempts are spaced by the retry policy's backoff. Once
//! `max_retries` consecutive attempts have failed the provider is marked
//! failed and left alone until it is registered again.

use std::sync::Arc;

use futures::future::join_all;
use polystore_core::{HealthState, PersistenceError};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{ProviderRegistry, ProviderSlot};

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Probe succeeded.
    Healthy,
    /// Probe failed.
    Failed,
    /// A probe for this provider was already running.
    Skipped,
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

impl ProviderRegistry {
    /// Probe every registered provider once, concurrently.
    ///
    /// Returns the outcome per provider name, in registration order.
    pub async fn check_all(&self) -> Vec<(String, ProbeOutcome)> {
        let slots = self.slots();
        let probes = slots.iter().map(|slot| async move {
            (slot.config.name.clone(), self.check_slot(slot).await)
        });
        join_all(probes).await
    }

    /// Probe one provider. `None` if it is not registered.
    pub async fn check(&self, name: &str) -> Option<ProbeOutcome> {
        let slot = self.providers.get(name).map(|s| Arc::clone(s.value()))?;
        Some(self.check_slot(&slot).await)
    }

    /// Record an operational connection failure observed outside the loop.
    ///
    /// Counts like a failed probe so routing stops using the provider without
    /// waiting for the next tick.
    pub fn report_failure(&self, name: &str, error: &PersistenceError) {
        let Some(slot) = self.providers.get(name).map(|s| Arc::clone(s.value())) else {
            return;
        };
        let threshold = self.settings.failure_threshold;
        let failures = slot.update_health(|h| h.record_failure(error.to_string(), threshold));
        debug!(provider = %name, consecutive_failures = failures, "Operational failure reported");
    }

    async fn check_slot(&self, slot: &ProviderSlot) -> ProbeOutcome {
        let Ok(_probe) = slot.probe.try_lock() else {
            debug!(provider = %slot.config.name, "Probe already running, skipping");
            return ProbeOutcome::Skipped;
        };
        let name = slot.config.name.as_str();
        let started = Instant::now();
        let result =
            match tokio::time::timeout(self.settings.probe_timeout(), slot.provider.test_connection()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!(
                    "health probe timed out after {}ms",
                    self.settings.probe_timeout_ms
                )),
            };

        match result {
            Ok(()) => {
                let latency = elapsed_ms(started);
                let previous = slot.update_health(|h| {
                    let previous = h.state;
                    h.record_success(latency);
                    previous
                });
                if matches!(previous, HealthState::Degraded | HealthState::Unhealthy) {
                    info!(provider = %name, latency_ms = latency, "Provider recovered");
                }
                ProbeOutcome::Healthy
            },
            Err(error) => {
                let threshold = self.settings.failure_threshold;
                let failures = slot.update_health(|h| h.record_failure(error.clone(), threshold));
                warn!(provider = %name, consecutive_failures = failures, error = %error, "Health probe failed");
                if failures >= threshold {
                    self.reconnect_if_allowed(slot).await;
                }
                ProbeOutcome::Failed
            },
        }
    }

    /// Attempt a reconnection if the budget and backoff allow it.
    async fn reconnect_if_allowed(&self, slot: &ProviderSlot) {
        let name = slot.config.name.as_str();
        let health = slot.health();
        if health.state == HealthState::Failed {
            return;
        }
        if health.reconnect_attempts >= self.retry.max_retries {
            let reason = format!(
                "gave up after {} reconnection attempts: {}",
                health.reconnect_attempts,
                health.last_error.as_deref().unwrap_or("unknown error")
            );
            warn!(provider = %name, attempts = health.reconnect_attempts, "Provider marked failed");
            slot.update_health(|h| h.mark_failed(reason));
            return;
        }
        if let Some(last) = health.last_reconnect_at {
            let backoff = self.retry.delay_for_attempt(health.reconnect_attempts);
            if last.elapsed() < backoff {
                debug!(
                    provider = %name,
                    backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                    "Reconnection deferred"
                );
                return;
            }
        }

        let attempt = slot.update_health(|h| {
            h.reconnect_attempts = h.reconnect_attempts.saturating_add(1);
            h.last_reconnect_at = Some(Instant::now());
            h.reconnect_attempts
        });
        info!(provider = %name, attempt, max_retries = self.retry.max_retries, "Reconnecting provider");

        if let Err(e) = slot.provider.shutdown().await {
            debug!(provider = %name, error = %e, "Shutdown before reconnect failed");
        }
        let timeout = std::time::Duration::from_millis(slot.config.connect_timeout_ms);
        match tokio::time::timeout(timeout, slot.provider.initialize()).await {
            Ok(Ok(())) => info!(provider = %name, attempt, "Reconnected provider"),
            Ok(Err(e)) => {
                warn!(provider = %name, attempt, error = %e, "Reconnection failed");
                slot.update_health(|h| h.last_error = Some(e.to_string()));
            },
            Err(_) => {
                warn!(provider = %name, attempt, "Reconnection timed out");
                slot.update_health(|h| {
                    h.last_error = Some(format!(
                        "reconnect timed out after {}ms",
                        slot.config.connect_timeout_ms
                    ));
                });
            },
        }
    }

    /// Start the health-check loop. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut guard) = self.loop_handle.lock() else {
            return;
        };
        if guard.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let registry = Arc::clone(self);
        let period = self.settings.health_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Registration already connected every provider; skip the immediate tick.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let outcomes = registry.check_all().await;
                        debug!(probed = outcomes.len(), "Health check tick");
                    },
                }
            }
            debug!("Health-check loop stopped");
        });
        info!(interval_secs = period.as_secs(), "Health-check loop started");
        *guard = Some((cancel, handle));
    }

    /// Stop the health-check loop and wait for it to exit.
    pub async fn stop(&self) {
        let running = self.loop_handle.lock().ok().and_then(|mut g| g.take());
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Health-check loop ended abnormally");
            }
        }
    }

    /// Whether the health-check loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.loop_handle.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}
