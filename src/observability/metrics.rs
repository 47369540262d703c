//! Metrics collection and exposition.
//!
//! # Metrics
//! - `unblock_requests_total` (counter): requests by method, status, path kind
//! - `unblock_request_duration_seconds` (histogram): end-to-end handling latency
//! - `unblock_rewrite_degraded_total` (counter): HTML served unrewritten
//! - `unblock_encoding_fallback_total` (counter): bodies served undecoded
//! - `unblock_stream_responses_total` (counter): responses streamed through
//!
//! Recording is a no-op until a recorder is installed, so library code and
//! tests can call these freely.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, path_kind: &'static str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("path_kind", path_kind.to_string()),
    ];
    counter!("unblock_requests_total", &labels).increment(1);
    histogram!("unblock_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_rewrite_degraded(reason: &'static str) {
    counter!("unblock_rewrite_degraded_total", "reason" => reason).increment(1);
}

pub fn record_encoding_fallback(encoding: &str) {
    counter!("unblock_encoding_fallback_total", "encoding" => encoding.to_string()).increment(1);
}

pub fn record_stream() {
    counter!("unblock_stream_responses_total").increment(1);
}
