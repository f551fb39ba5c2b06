//! Prometheus metrics for analysis runs.
//!
//! Metrics are recorded through the `metrics` facade, so they are no-ops until [`install`]
//! registers the Prometheus exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::errors::{Error, Result};

pub const RUNS_TOTAL: &str = "chatinsight_analysis_runs_total";
pub const SESSIONS_ANALYZED_TOTAL: &str = "chatinsight_sessions_analyzed_total";
pub const SESSION_FAILURES_TOTAL: &str = "chatinsight_session_failures_total";
pub const RUN_DURATION_SECONDS: &str = "chatinsight_analysis_run_duration_seconds";
pub const UNITS_INFLIGHT: &str = "chatinsight_analysis_units_inflight";

/// Install the global recorder and serve `/metrics` on `listen_address`.
pub fn install(listen_address: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen_address)
        .install()
        .map_err(|e| Error::Internal {
            operation: format!("install Prometheus exporter on {listen_address}: {e}"),
        })?;

    describe();
    tracing::info!(%listen_address, "Prometheus exporter listening");
    Ok(())
}

fn describe() {
    describe_counter!(RUNS_TOTAL, "Analysis runs by terminal outcome");
    describe_counter!(SESSIONS_ANALYZED_TOTAL, "Analysis records written");
    describe_counter!(SESSION_FAILURES_TOTAL, "Sessions whose analysis failed, by reason");
    describe_histogram!(RUN_DURATION_SECONDS, "Wall-clock duration of analysis runs");
    describe_gauge!(UNITS_INFLIGHT, "Per-session analyses currently awaiting the model");
}

pub fn record_run(outcome: &'static str, duration: Duration) {
    counter!(RUNS_TOTAL, "outcome" => outcome).increment(1);
    histogram!(RUN_DURATION_SECONDS, "outcome" => outcome).record(duration.as_secs_f64());
}

pub fn record_persisted(count: u64) {
    counter!(SESSIONS_ANALYZED_TOTAL).increment(count);
}

pub fn record_session_failure(reason: &'static str) {
    counter!(SESSION_FAILURES_TOTAL, "reason" => reason).increment(1);
}

/// Tracks one in-flight unit of work on the gauge for as long as it is alive.
pub struct InflightGuard(());

impl InflightGuard {
    pub fn start() -> Self {
        gauge!(UNITS_INFLIGHT).increment(1.0);
        Self(())
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(UNITS_INFLIGHT).decrement(1.0);
    }
}
