//! Polystore Telemetry - logging setup and operation metrics.
//!
//! This crate provides:
//! - Structured logging setup over `tracing-subscriber` (pretty, compact,
//!   json and full formats)
//! - [`MetricsRecorder`], an [`ObservabilityHook`](polystore_core::ObservabilityHook)
//!   that aggregates per-operation counters and renders them in the
//!   Prometheus text format

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;
mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_logging};
pub use metrics::{MetricsRecorder, MetricsSnapshot, OperationMetrics};
