//! In-memory operation metrics.

use dashmap::DashMap;
use polystore_core::{ObservabilityHook, OperationEvent, TechnologyType};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    calls: u64,
    failures: u64,
    cache_hits: u64,
    affected: u64,
    total_us: u64,
    max_us: u64,
}

/// Aggregated counters for one `(operation, technology)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationMetrics {
    /// Operation name.
    pub operation: String,
    /// Technology, or `None` for cache-only and cross-technology calls.
    pub technology: Option<TechnologyType>,
    /// Calls recorded.
    pub calls: u64,
    /// Failed calls.
    pub failures: u64,
    /// Calls answered from the cache.
    pub cache_hits: u64,
    /// Records returned or modified.
    pub affected: u64,
    /// Mean latency in milliseconds.
    pub avg_latency_ms: f64,
    /// Worst latency in milliseconds.
    pub max_latency_ms: f64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Per-operation counters, sorted by operation then technology.
    pub operations: Vec<OperationMetrics>,
    /// Failure counts by error kind, sorted by kind.
    pub errors: Vec<(String, u64)>,
}

impl MetricsSnapshot {
    /// Total calls across operations.
    #[must_use]
    pub fn total_calls(&self) -> u64 {
        self.operations
            .iter()
            .fold(0u64, |acc, m| acc.saturating_add(m.calls))
    }

    /// Counters for one pair, if recorded.
    #[must_use]
    pub fn get(
        &self,
        operation: &str,
        technology: Option<TechnologyType>,
    ) -> Option<&OperationMetrics> {
        self.operations
            .iter()
            .find(|m| m.operation == operation && m.technology == technology)
    }
}

/// [`ObservabilityHook`] that aggregates events in memory.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    ops: DashMap<(String, Option<TechnologyType>), Counters>,
    errors: DashMap<&'static str, u64>,
}

impl MetricsRecorder {
    /// Empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out every counter.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut operations: Vec<OperationMetrics> = self
            .ops
            .iter()
            .map(|entry| {
                let ((operation, technology), c) = (entry.key(), entry.value());
                let avg_us = if c.calls == 0 {
                    0.0
                } else {
                    c.total_us as f64 / c.calls as f64
                };
                OperationMetrics {
                    operation: operation.clone(),
                    technology: *technology,
                    calls: c.calls,
                    failures: c.failures,
                    cache_hits: c.cache_hits,
                    affected: c.affected,
                    avg_latency_ms: avg_us / 1000.0,
                    max_latency_ms: c.max_us as f64 / 1000.0,
                }
            })
            .collect();
        operations.sort_by(|a, b| {
            a.operation
                .cmp(&b.operation)
                .then_with(|| a.technology.cmp(&b.technology))
        });

        let mut errors: Vec<(String, u64)> = self
            .errors
            .iter()
            .map(|e| ((*e.key()).to_owned(), *e.value()))
            .collect();
        errors.sort();

        MetricsSnapshot { operations, errors }
    }

    /// Render counters in the Prometheus text exposition format.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn render_prometheus(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "# HELP persistence_query_count_total Operations executed, by outcome."
        );
        let _ = writeln!(out, "# TYPE persistence_query_count_total counter");
        for m in &snap.operations {
            let labels = labels(m);
            let _ = writeln!(
                out,
                "persistence_query_count_total{{{labels},status=\"success\"}} {}",
                m.calls.saturating_sub(m.failures)
            );
            let _ = writeln!(
                out,
                "persistence_query_count_total{{{labels},status=\"failure\"}} {}",
                m.failures
            );
        }

        let _ = writeln!(
            out,
            "# HELP persistence_query_duration_seconds Operation latency."
        );
        let _ = writeln!(out, "# TYPE persistence_query_duration_seconds summary");
        for m in &snap.operations {
            let labels = labels(m);
            let total_secs = m.avg_latency_ms * m.calls as f64 / 1000.0;
            let _ = writeln!(
                out,
                "persistence_query_duration_seconds_sum{{{labels}}} {total_secs}"
            );
            let _ = writeln!(
                out,
                "persistence_query_duration_seconds_count{{{labels}}} {}",
                m.calls
            );
        }

        let _ = writeln!(
            out,
            "# HELP persistence_cache_hits_total Operations answered from the cache."
        );
        let _ = writeln!(out, "# TYPE persistence_cache_hits_total counter");
        for m in &snap.operations {
            let _ = writeln!(
                out,
                "persistence_cache_hits_total{{{}}} {}",
                labels(m),
                m.cache_hits
            );
        }

        let _ = writeln!(
            out,
            "# HELP persistence_records_affected_total Records returned or modified."
        );
        let _ = writeln!(out, "# TYPE persistence_records_affected_total counter");
        for m in &snap.operations {
            let _ = writeln!(
                out,
                "persistence_records_affected_total{{{}}} {}",
                labels(m),
                m.affected
            );
        }

        let _ = writeln!(out, "# HELP persistence_errors_total Failures by kind.");
        let _ = writeln!(out, "# TYPE persistence_errors_total counter");
        for (kind, count) in &snap.errors {
            let _ = writeln!(out, "persistence_errors_total{{kind=\"{kind}\"}} {count}");
        }

        out
    }

    /// Drop every counter.
    pub fn reset(&self) {
        self.ops.clear();
        self.errors.clear();
    }
}

fn labels(m: &OperationMetrics) -> String {
    format!(
        "operation=\"{}\",technology=\"{}\"",
        m.operation,
        m.technology.map_or("none", TechnologyType::as_str)
    )
}

impl ObservabilityHook for MetricsRecorder {
    fn record(&self, event: &OperationEvent) {
        let micros = u64::try_from(event.duration.as_micros()).unwrap_or(u64::MAX);
        let affected = u64::try_from(event.affected).unwrap_or(u64::MAX);
        let mut entry = self
            .ops
            .entry((event.operation.clone(), event.technology))
            .or_default();
        let c = entry.value_mut();
        c.calls = c.calls.saturating_add(1);
        c.total_us = c.total_us.saturating_add(micros);
        c.max_us = c.max_us.max(micros);
        c.affected = c.affected.saturating_add(affected);
        if event.from_cache {
            c.cache_hits = c.cache_hits.saturating_add(1);
        }
        if !event.success {
            c.failures = c.failures.saturating_add(1);
        }
        drop(entry);

        if let Some(kind) = event.error_kind {
            let mut count = self.errors.entry(kind).or_default();
            *count = count.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn event(op: &str, tech: TechnologyType, ms: u64, success: bool) -> OperationEvent {
        let mut e = OperationEvent::new(op);
        e.technology = Some(tech);
        e.duration = Duration::from_millis(ms);
        e.success = success;
        e.affected = 2;
        if !success {
            e.error_kind = Some("connection");
        }
        e
    }

    #[test]
    fn aggregates_per_operation_and_technology() {
        let rec = MetricsRecorder::new();
        rec.record(&event("select", TechnologyType::Relational, 10, true));
        rec.record(&event("select", TechnologyType::Relational, 30, false));
        rec.record(&event("select", TechnologyType::Document, 5, true));

        let snap = rec.snapshot();
        assert_eq!(snap.total_calls(), 3);
        let sql = snap.get("select", Some(TechnologyType::Relational)).unwrap();
        assert_eq!(sql.calls, 2);
        assert_eq!(sql.failures, 1);
        assert_eq!(sql.affected, 4);
        assert!((sql.avg_latency_ms - 20.0).abs() < 1e-9);
        assert!((sql.max_latency_ms - 30.0).abs() < 1e-9);
        assert_eq!(snap.errors, vec![("connection".to_owned(), 1)]);
    }

    #[test]
    fn prometheus_output_has_expected_series() {
        let rec = MetricsRecorder::new();
        rec.record(&event("insert", TechnologyType::Relational, 4, true));
        let text = rec.render_prometheus();
        assert!(text.contains("# TYPE persistence_query_count_total counter"));
        assert!(text.contains(
            "persistence_query_count_total{operation=\"insert\",technology=\"relational\",status=\"success\"} 1"
        ));
        assert!(text.contains(
            "persistence_query_duration_seconds_count{operation=\"insert\",technology=\"relational\"} 1"
        ));
    }

    #[test]
    fn reset_clears_counters() {
        let rec = MetricsRecorder::new();
        rec.record(&event("delete", TechnologyType::Cache, 1, true));
        rec.reset();
        assert_eq!(rec.snapshot().total_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_recording() {
        let rec = std::sync::Arc::new(MetricsRecorder::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let rec = rec.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    rec.record(&event("select", TechnologyType::Cache, 1, true));
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(rec.snapshot().total_calls(), 800);
    }
}
