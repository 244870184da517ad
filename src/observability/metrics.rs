//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define membership metrics (table size, transitions, poll outcomes)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `iman_instances` (gauge): table size by status
//! - `iman_transitions_total` (counter): applied transitions by kind
//! - `iman_registry_polls_total` (counter): registry polls by outcome
//! - `iman_poll_duration_seconds` (histogram): registry fetch latency
//! - `iman_scheduled_evictions` (gauge): finalize timers currently armed
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder (tests, embedders) every call is a no-op

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;

    metrics::describe_gauge!("iman_instances", "Instances in the membership table by status");
    metrics::describe_counter!(
        "iman_transitions_total",
        "Membership transitions applied by the merge loop"
    );
    metrics::describe_counter!("iman_registry_polls_total", "Registry polls by outcome");
    metrics::describe_histogram!(
        "iman_poll_duration_seconds",
        "Latency of registry health queries"
    );
    metrics::describe_gauge!(
        "iman_scheduled_evictions",
        "Pending instances with an armed finalize timer"
    );

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_membership(alive: usize, pending: usize) {
    metrics::gauge!("iman_instances", "status" => "alive").set(alive as f64);
    metrics::gauge!("iman_instances", "status" => "pending").set(pending as f64);
}

pub fn record_transition(kind: &'static str) {
    metrics::counter!("iman_transitions_total", "kind" => kind).increment(1);
}

pub fn record_poll(outcome: &'static str, elapsed: Duration) {
    metrics::counter!("iman_registry_polls_total", "outcome" => outcome).increment(1);
    metrics::histogram!("iman_poll_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_scheduled_evictions(count: usize) {
    metrics::gauge!("iman_scheduled_evictions").set(count as f64);
}
