//! Prometheus metrics setup and descriptions.
//!
//! Metrics are recorded throughout the codebase using the `metrics` crate's
//! macros. This module installs the Prometheus exporter and registers
//! human-readable descriptions for each metric.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusHandle;

/// Install the Prometheus recorder and register metric descriptions.
///
/// Returns `None` if a recorder is already installed (e.g. in tests where
/// multiple `build_app` calls share a process). Metric recording still works
/// — the `metrics` macros route to whichever recorder was installed first.
pub fn install() -> Option<PrometheusHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .ok()?;
    describe();
    Some(handle)
}

fn describe() {
    describe_gauge!(
        "parksim_sessions_active",
        "Simulation sessions currently running or paused"
    );
    describe_gauge!(
        "parksim_cars_active",
        "Cars currently tracked by a session (arrived or parked)"
    );
    describe_gauge!("parksim_stalls_occupied", "Parking stalls currently reserved");
    describe_counter!("parksim_events_total", "Event frames emitted, by event kind");
    describe_counter!(
        "parksim_admission_rejected_total",
        "Cars that drove away, by reason (refused, no_stall)"
    );
}
