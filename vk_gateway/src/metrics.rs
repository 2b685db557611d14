//! Prometheus metrics for the gateway.
//!
//! The library records through the `metrics` facade; this module installs
//! the exporter and describes the series.
//!
//! # Series
//!
//! - `valkyrie_calls_total{kind,operation,status}`
//! - `valkyrie_call_duration_seconds{kind,operation}`
//! - `valkyrie_unmapped_pam_errors_total{backend}`
//! - `valkyrie_backend_info{backend,settlement_type}`

use metrics::Unit;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    Ok(())
}

/// Register help text and units for every series the gateway emits.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "valkyrie_calls_total",
        "Outbound calls by kind (pam, http), operation and outcome"
    );
    metrics::describe_histogram!(
        "valkyrie_call_duration_seconds",
        Unit::Seconds,
        "Latency of outbound calls"
    );
    metrics::describe_counter!(
        "valkyrie_unmapped_pam_errors_total",
        "PAM error codes without a domain mapping"
    );
    metrics::describe_gauge!("valkyrie_backend_info", "Configured PAM backend, always 1");
}

/// Publish which backend is serving.
pub fn backend_ready(backend: &str, settlement_type: &str) {
    metrics::gauge!("valkyrie_backend_info",
        "backend" => backend.to_string(),
        "settlement_type" => settlement_type.to_string()
    )
    .set(1.0);
}
