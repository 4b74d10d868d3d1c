//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::{MessageKind, RelayError, SweepReport};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// Metric names.
pub mod names {
    pub const JOINS_TOTAL: &str = "parley_joins_total";
    pub const HEARTBEATS_TOTAL: &str = "parley_heartbeats_total";
    pub const MESSAGES_TOTAL: &str = "parley_messages_total";
    pub const EVICTIONS_TOTAL: &str = "parley_evictions_total";
    pub const SWEEP_FAILURES_TOTAL: &str = "parley_sweep_failures_total";
    pub const PARTICIPANTS_ACTIVE: &str = "parley_participants_active";
    pub const REQUEST_SECONDS: &str = "parley_request_seconds";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(names::JOINS_TOTAL, "Total number of successful joins");
    metrics::describe_counter!(names::HEARTBEATS_TOTAL, "Total number of accepted heartbeats");
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages posted");
    metrics::describe_counter!(
        names::EVICTIONS_TOTAL,
        "Total number of participants evicted for inactivity"
    );
    metrics::describe_counter!(
        names::SWEEP_FAILURES_TOTAL,
        "Total number of sweep items that failed"
    );
    metrics::describe_gauge!(
        names::PARTICIPANTS_ACTIVE,
        "Participants currently in the room"
    );
    metrics::describe_histogram!(names::REQUEST_SECONDS, "Request handling latency in seconds");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of rejected operations");

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

/// Record a join.
pub fn record_join() {
    counter!(names::JOINS_TOTAL).increment(1);
    gauge!(names::PARTICIPANTS_ACTIVE).increment(1.0);
}

/// Record a heartbeat.
pub fn record_heartbeat() {
    counter!(names::HEARTBEATS_TOTAL).increment(1);
}

/// Record a posted message.
pub fn record_message(kind: MessageKind) {
    counter!(names::MESSAGES_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Reset the participant count from a full listing.
pub fn set_active_participants(count: usize) {
    gauge!(names::PARTICIPANTS_ACTIVE).set(count as f64);
}

/// Record the outcome of a sweep pass.
pub fn record_sweep(report: &SweepReport) {
    counter!(names::EVICTIONS_TOTAL).increment(report.evicted.len() as u64);
    gauge!(names::PARTICIPANTS_ACTIVE).set(report.remaining as f64);
    counter!(names::SWEEP_FAILURES_TOTAL).increment(report.failed as u64);
}

/// Record a rejected operation.
pub fn record_error(error: &RelayError) {
    counter!(names::ERRORS_TOTAL, "kind" => error.kind()).increment(1);
}

/// Records request latency for a route when dropped.
pub struct RequestTimer {
    route: &'static str,
    start: Instant,
}

impl RequestTimer {
    /// Start timing a request to `route`.
    #[must_use]
    pub fn new(route: &'static str) -> Self {
        Self {
            route,
            start: Instant::now(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        histogram!(names::REQUEST_SECONDS, "route" => self.route)
            .record(self.start.elapsed().as_secs_f64());
    }
}
