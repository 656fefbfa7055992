use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thin handle around the global metrics recorder.
///
/// After `Metrics::install()` the `metrics` crate macros can be used anywhere
/// in the handler. The `PrometheusHandle` is retained solely for rendering
/// the `/metrics` endpoint text.
///
/// `proxy_request_duration_seconds_sum` is an accumulating gauge rather than
/// a histogram: the contract only asks for a sum/count summary pair, and a
/// full histogram would additionally emit `_bucket` lines nothing here reads.
#[derive(Clone)]
pub struct Metrics {
    handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and register metric
    /// descriptions. Idempotent — the underlying recorder can only be
    /// installed once per process, so repeat calls (as happen across
    /// independent tests in one binary) return a handle to the existing one
    /// instead of panicking on a second `install_recorder`.
    pub fn install() -> Self {
        let handle = HANDLE.get_or_init(Self::install_once).clone();
        Self { handle }
    }

    fn install_once() -> PrometheusHandle {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install metrics recorder");

        describe_counter!(
            "proxy_requests_total",
            Unit::Count,
            "Total client requests with a successfully parsed preamble"
        );
        describe_counter!(
            "proxy_requests_parse_errors_total",
            Unit::Count,
            "Total requests rejected for a malformed preamble"
        );
        describe_counter!(
            "proxy_responses_total",
            Unit::Count,
            "Total responses delivered to the client, by status class"
        );
        describe_gauge!(
            "proxy_request_duration_seconds_sum",
            Unit::Seconds,
            "Sum of per-request durations from accept to release"
        );
        describe_counter!(
            "proxy_request_duration_seconds_count",
            Unit::Count,
            "Count of requests contributing to proxy_request_duration_seconds_sum"
        );
        describe_counter!(
            "proxy_bytes_sent_total",
            Unit::Bytes,
            "Total response bytes relayed to clients"
        );
        describe_counter!(
            "proxy_upstream_requests_total",
            Unit::Count,
            "Total requests routed to each upstream"
        );
        describe_counter!(
            "proxy_upstream_errors_total",
            Unit::Count,
            "Total upstream-side failures, by upstream and error type"
        );
        describe_counter!(
            "proxy_timeout_errors_total",
            Unit::Count,
            "Total deadline expirations, by phase"
        );

        handle
    }

    pub fn record_request_parsed(&self) {
        counter!("proxy_requests_total").increment(1);
    }

    pub fn record_parse_error(&self) {
        counter!("proxy_requests_parse_errors_total").increment(1);
    }

    pub fn record_response(&self, status_class: &'static str) {
        counter!("proxy_responses_total", "status_class" => status_class).increment(1);
    }

    pub fn record_duration(&self, seconds: f64) {
        gauge!("proxy_request_duration_seconds_sum").increment(seconds);
        counter!("proxy_request_duration_seconds_count").increment(1);
    }

    pub fn record_bytes_sent(&self, n: u64) {
        counter!("proxy_bytes_sent_total").increment(n);
    }

    pub fn record_upstream_request(&self, upstream: &str) {
        counter!("proxy_upstream_requests_total", "upstream" => upstream.to_string()).increment(1);
    }

    pub fn record_upstream_error(&self, upstream: &str, error_type: &'static str) {
        counter!(
            "proxy_upstream_errors_total",
            "upstream" => upstream.to_string(),
            "type" => error_type
        )
        .increment(1);
    }

    pub fn record_timeout(&self, phase: &'static str) {
        counter!("proxy_timeout_errors_total", "type" => phase).increment(1);
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
