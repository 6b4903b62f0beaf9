//! Metric registration and recording helpers.
//!
//! The `metrics` facade backs a Prometheus recorder; the admin API serves
//! the rendered exposition from its metrics route. All series carry the
//! `v2mgr_` prefix.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusHandle;

pub const PROBES_TOTAL: &str = "v2mgr_probes_total";
pub const LATENCY_SECONDS: &str = "v2mgr_latency_seconds";
pub const QUARANTINE_TOTAL: &str = "v2mgr_quarantine_total";
pub const DELETIONS_TOTAL: &str = "v2mgr_deletions_total";

/// Installs the Prometheus recorder and registers series descriptions.
/// Returns `None` when a recorder is already installed (tests).
pub fn install() -> Option<PrometheusHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .ok()?;
    describe_counter!(PROBES_TOTAL, "Total probes, labelled by result");
    describe_histogram!(LATENCY_SECONDS, "Probe latency in seconds");
    describe_counter!(QUARANTINE_TOTAL, "Total quarantines");
    describe_counter!(DELETIONS_TOTAL, "Total deletions");
    Some(handle)
}

/// Counts one probe outcome; successful probes also observe their latency.
pub fn record_probe(success: bool, latency: Duration) {
    if success {
        counter!(PROBES_TOTAL, "result" => "success").increment(1);
        histogram!(LATENCY_SECONDS).record(latency.as_secs_f64());
    } else {
        counter!(PROBES_TOTAL, "result" => "failure").increment(1);
    }
}

pub fn record_quarantine() {
    counter!(QUARANTINE_TOTAL).increment(1);
}

pub fn record_deletion() {
    counter!(DELETIONS_TOTAL).increment(1);
}
