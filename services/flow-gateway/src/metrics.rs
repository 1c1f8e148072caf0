//! Prometheus metrics exposition
//!
//! Gateway-level series, next to the pool and orchestrator counters that the
//! library crates emit through the same recorder:
//!
//! - `flow_gateway_requests_total` (counter): labels `route`, `status`
//! - `flow_gateway_request_duration_seconds` (histogram): label `route`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_METRIC: &str = "flow_gateway_request_duration_seconds";

/// Image calls finish in seconds; video polling can run for ten minutes.
const DURATION_BUCKETS: &[f64] = &[
    0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(DURATION_METRIC.to_string()), DURATION_BUCKETS)
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a finished generation request.
///
/// For streamed requests `status` is the status of the stream response and
/// the duration covers only the time to the first byte.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!("flow_gateway_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    metrics::histogram!(DURATION_METRIC, "route" => route).record(duration_secs);
}
