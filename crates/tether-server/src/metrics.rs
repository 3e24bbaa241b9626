//! Metrics collection and export for Tether.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tether_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tether_connections_active";
    pub const CONNECTIONS_REJECTED: &str = "tether_connections_rejected_total";
    pub const EVENTS_TOTAL: &str = "tether_events_total";
    pub const REMOTE_ERRORS_TOTAL: &str = "tether_remote_errors_total";
    pub const ERRORS_TOTAL: &str = "tether_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_REJECTED,
        "Connections refused because of the connection limit"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Total number of events by direction");
    metrics::describe_counter!(
        names::REMOTE_ERRORS_TOTAL,
        "Errors raised by peers, by error name"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of local errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a refused connection.
pub fn record_rejection() {
    counter!(names::CONNECTIONS_REJECTED).increment(1);
}

/// Record an event.
pub fn record_event(direction: &'static str) {
    counter!(names::EVENTS_TOTAL, "direction" => direction).increment(1);
}

/// Record an error raised by the peer.
pub fn record_remote_error(name: &str) {
    counter!(names::REMOTE_ERRORS_TOTAL, "name" => name.to_string()).increment(1);
}

/// Record a local error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Tracks one open connection; records the disconnection on drop.
pub struct ConnectionMetricsGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self { active }
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
