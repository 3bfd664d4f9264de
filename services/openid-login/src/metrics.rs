//! Prometheus metrics exposition
//!
//! Service-level metrics, alongside the protocol metrics `openid-rp` emits:
//!
//! - `openid_login_http_requests_total` (counter): labels `route`, `status`
//! - `openid_login_http_request_duration_seconds` (histogram): label `route`

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("openid_login_http_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// The request duration is rendered as a histogram with `_bucket` lines from
/// 5ms to 60s. Discovery and check_authentication are outbound HTTP calls, so
/// a login request can take as long as the direct request timeout.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed request to one of the login routes.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!(
        "openid_login_http_requests_total",
        "route" => route,
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("openid_login_http_request_duration_seconds", "route" => route)
        .record(duration_secs);
}
