//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, outcome
//! - `proxy_request_duration_seconds` (histogram): time to response head
//! - `proxy_token_acquisitions_total` (counter): issuer calls by outcome
//! - `proxy_relay_truncated_total` (counter): bodies cut off mid-stream
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus endpoint is opt-in (`observability.metrics_enabled`)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::StartupError;

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), StartupError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| StartupError::Metrics(e.to_string()))?;

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a finished proxy request.
pub fn record_request(method: &str, status: u16, outcome: &'static str, start: Instant) {
    metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    metrics::histogram!(
        "proxy_request_duration_seconds",
        "method" => method.to_string(),
        "outcome" => outcome
    )
    .record(start.elapsed().as_secs_f64());
}

/// Record one call to the token issuer.
pub fn record_token_acquisition(issuer: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    metrics::counter!(
        "proxy_token_acquisitions_total",
        "issuer" => issuer,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record a response body that failed after the head was sent.
pub fn record_truncated_response() {
    metrics::counter!("proxy_relay_truncated_total").increment(1);
}
