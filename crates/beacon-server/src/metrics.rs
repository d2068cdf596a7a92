//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use beacon_core::RegistryStats;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const CLIENTS: &str = "beacon_clients";
    pub const CLIENTS_ONLINE: &str = "beacon_clients_online";
    pub const MESSAGES_TOTAL: &str = "beacon_messages_total";
    pub const SEND_LATENCY_SECONDS: &str = "beacon_send_latency_seconds";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_gauge!(names::CLIENTS, "Current number of registered clients");
    metrics::describe_gauge!(names::CLIENTS_ONLINE, "Current number of online clients");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages by direction");
    metrics::describe_histogram!(
        names::SEND_LATENCY_SECONDS,
        "Time until a client connection accepted a message, in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors by kind");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message.
pub fn record_message(direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
}

/// Record delivery latency.
pub fn record_send_latency(seconds: f64) {
    histogram!(names::SEND_LATENCY_SECONDS).record(seconds);
}

/// Update client gauges.
pub fn set_clients(stats: &RegistryStats) {
    gauge!(names::CLIENTS).set(stats.client_count as f64);
    gauge!(names::CLIENTS_ONLINE).set(stats.online_count as f64);
}

/// Record an error.
pub fn record_error(kind: &str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
