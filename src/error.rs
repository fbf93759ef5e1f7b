//! Error taxonomy.
//!
//! Per-request failures are [`ProxyError`]s and always become a plain-text
//! HTTP response. Startup failures are [`StartupError`]s and stop the
//! process before it serves anything.

use std::time::Duration;

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::auth::TokenError;
use crate::config::ConfigError;

/// A per-request failure in the forwarding pipeline.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// No identity token could be obtained; the upstream was not contacted.
    #[error("Could not generate authentication token: {0}")]
    AuthUnavailable(#[source] TokenError),

    /// DNS, connect, TLS or protocol failure talking to the upstream.
    #[error("Proxy request failed: upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The upstream did not answer within the round-trip deadline.
    #[error("Proxy request failed: upstream did not respond within {}s", .0.as_secs())]
    UpstreamTimeout(Duration),

    /// The upstream body failed after the response head was sent.
    #[error("upstream body ended early: {0}")]
    PartialResponse(String),

    /// The inbound method is not in the allowed list.
    #[error("Method {0} not allowed")]
    MethodNotAllowed(Method),

    /// The inbound request could not be turned into an upstream request.
    #[error("Bad request: {0}")]
    InvalidRequest(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::AuthUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::PartialResponse(_) => StatusCode::BAD_GATEWAY,
            ProxyError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Label used for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::AuthUnavailable(_) => "auth_unavailable",
            ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::PartialResponse(_) => "partial_response",
            ProxyError::MethodNotAllowed(_) => "method_not_allowed",
            ProxyError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Fatal errors while bringing the proxy up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("credentials error: {0}")]
    Token(#[from] TokenError),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("metrics exporter error: {0}")]
    Metrics(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
