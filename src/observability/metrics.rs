//! Lifecycle metrics.
//!
//! # Metrics
//! - `app_adapter_start_failures_total` (counter): start failures by adapter
//! - `app_adapter_start_failures_dropped_total` (counter): failures dropped because the error channel was full
//! - `app_adapter_stop_failures_total` (counter): stop failures by adapter and reason
//! - `app_run_duration_seconds` (histogram): wall-clock time of one run
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use thiserror::Error;

/// Error installing the Prometheus exporter.
#[derive(Debug, Error)]
#[error("failed to install metrics exporter: {0}")]
pub struct MetricsError(#[from] BuildError);

/// Install the Prometheus recorder and its HTTP scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_start_failure(adapter: &str) {
    metrics::counter!("app_adapter_start_failures_total", "adapter" => adapter.to_string()).increment(1);
}

pub fn record_dropped_start_failure(adapter: &str) {
    metrics::counter!("app_adapter_start_failures_dropped_total", "adapter" => adapter.to_string())
        .increment(1);
}

pub fn record_stop_failure(adapter: &str, reason: &'static str) {
    metrics::counter!(
        "app_adapter_stop_failures_total",
        "adapter" => adapter.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_run_duration(seconds: f64) {
    metrics::histogram!("app_run_duration_seconds").record(seconds);
}
