//! Metrics collection and export for Huddle.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const PARTICIPANTS_ACTIVE: &str = "huddle_participants_active";
    pub const CONNECTIONS_TOTAL: &str = "huddle_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "huddle_connections_active";
    pub const EVENTS_TOTAL: &str = "huddle_events_total";
    pub const POLLS_TOTAL: &str = "huddle_polls_total";
    pub const POLL_WAIT_SECONDS: &str = "huddle_poll_wait_seconds";
    pub const ERRORS_TOTAL: &str = "huddle_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_gauge!(
        names::PARTICIPANTS_ACTIVE,
        "Current number of registered participants"
    );
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of push connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of attached push connections"
    );
    metrics::describe_counter!(
        names::EVENTS_TOTAL,
        "Events delivered, by path (push or buffer)"
    );
    metrics::describe_counter!(names::POLLS_TOTAL, "Long-polls answered, by outcome");
    metrics::describe_histogram!(
        names::POLL_WAIT_SECONDS,
        "Time a long-poll was held open in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

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

/// Update the registered participant count.
pub fn set_participants(count: usize) {
    gauge!(names::PARTICIPANTS_ACTIVE).set(count as f64);
}

/// Record events handed to participants.
pub fn record_dispatch(pushed: usize, buffered: usize) {
    counter!(names::EVENTS_TOTAL, "path" => "push").increment(pushed as u64);
    counter!(names::EVENTS_TOTAL, "path" => "buffer").increment(buffered as u64);
}

/// Record an answered long-poll.
pub fn record_poll(outcome: &'static str, waited_seconds: f64) {
    counter!(names::POLLS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(names::POLL_WAIT_SECONDS).record(waited_seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records the end of a push connection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
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
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let _guard = ConnectionMetricsGuard::new();
        record_dispatch(2, 1);
        record_poll("empty", 30.0);
        record_error("unknown_nick");
        set_participants(3);
    }
}
