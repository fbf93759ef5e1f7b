//! Inbound request handling.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4) unless the caller sent one
//! - Echo the request ID on the response
//! - Decide which inbound methods are proxied
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing; it is forwarded
//!   upstream with the rest of the inbound headers
//! - The caller is not authenticated: the proxy only adds its own credential

use axum::http::{HeaderMap, Method};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::error::ProxyError;

/// Request ID header name.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Layer assigning `x-request-id` to requests that lack one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Layer copying `x-request-id` from the request onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

/// The request's ID, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Which inbound methods are proxied.
#[derive(Debug, Clone)]
pub struct MethodPolicy {
    any: bool,
    allowed: Vec<Method>,
}

impl MethodPolicy {
    /// Build from `listener.allowed_methods`. A `*` entry allows everything.
    pub fn from_config(methods: &[String]) -> Self {
        let any = methods.iter().any(|m| m == "*");
        let allowed = methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .collect();
        Self { any, allowed }
    }

    pub fn permits(&self, method: &Method) -> bool {
        self.any || self.allowed.contains(method)
    }

    pub fn check(&self, method: &Method) -> Result<(), ProxyError> {
        if self.permits(method) {
            Ok(())
        } else {
            Err(ProxyError::MethodNotAllowed(method.clone()))
        }
    }
}
