//! Response relay back to the caller.
//!
//! # Responsibilities
//! - Preserve the upstream status code
//! - Strip headers describing the upstream hop's framing
//! - Stream the upstream body without buffering it
//!
//! # Design Decisions
//! - Framing headers are recomputed by our own server for the caller hop
//! - A body error after the head is sent cannot be reported; the response
//!   is truncated and the event logged

use axum::body::Body;
use axum::http::header::{CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderName};
use axum::response::Response;
use futures_util::TryStreamExt;

use crate::error::ProxyError;
use crate::observability::metrics;

/// Upstream response headers never replayed to the caller.
pub static EXCLUDED_RESPONSE_HEADERS: [HeaderName; 4] =
    [CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION];

/// Copy every header except [`EXCLUDED_RESPONSE_HEADERS`], keeping repeats.
pub fn filter_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !EXCLUDED_RESPONSE_HEADERS.contains(name) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Turn an upstream response into the caller's response.
pub fn relay(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = filter_response_headers(upstream.headers());

    let body = upstream.bytes_stream().map_err(|e| {
        let err = ProxyError::PartialResponse(e.to_string());
        tracing::warn!(error = %err, "Relaying upstream body failed, response truncated");
        metrics::record_truncated_response();
        std::io::Error::other(err)
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
