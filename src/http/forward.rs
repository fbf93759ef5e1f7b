//! Request forwarding to the upstream.
//!
//! # Responsibilities
//! - Acquire an identity token for the upstream audience
//! - Rebuild the inbound request against the upstream base URL
//! - Override `Authorization` and `Host`, pass everything else through
//! - Stream the inbound body without buffering
//! - Classify transport failures (unreachable vs. timeout)
//!
//! # Design Decisions
//! - No retries: every inbound request produces exactly one upstream call
//! - Redirects are relayed to the caller, never followed
//! - Dropping the returned future (caller went away) aborts the upstream call

use std::error::Error as StdError;
use std::time::Duration;

use axum::body::{Body, HttpBody};
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::{HeaderMap, HeaderValue, Request, Uri};
use reqwest::Client;
use url::Url;

use crate::auth::{Audience, IdentityToken, TokenProvider};
use crate::config::validation::ValidationError;
use crate::config::{TimeoutConfig, UpstreamConfig};
use crate::error::ProxyError;
use crate::http::request::request_id;

/// The single upstream this process forwards to.
#[derive(Debug, Clone)]
pub struct Upstream {
    /// Base URL without a trailing slash; inbound path and query are appended.
    prefix: String,
    audience: Audience,
    host: HeaderValue,
}

impl Upstream {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidUpstream {
            url: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let authority = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let host = HeaderValue::from_str(&authority).map_err(|e| invalid(e.to_string()))?;
        let audience = Audience::parse(raw).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            prefix: url.as_str().trim_end_matches('/').to_string(),
            audience,
            host,
        })
    }

    /// Token audience: the base URL exactly as configured.
    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    /// `Host` header value: the upstream authority, port only when non-default.
    pub fn host(&self) -> &HeaderValue {
        &self.host
    }

    /// `{base}{path}?{query}`. Percent-escapes are kept as sent; raw bytes
    /// outside the URL path set (such as `{` and `}`) are percent-encoded.
    pub fn target_url(&self, uri: &Uri) -> Result<Url, ProxyError> {
        let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let path_and_query = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{}", path_and_query)
        };

        Url::parse(&format!("{}{}", self.prefix, path_and_query))
            .map_err(|e| ProxyError::InvalidRequest(format!("cannot build upstream URL: {}", e)))
    }
}

/// Build the client used for upstream calls.
pub fn build_client(upstream: &UpstreamConfig, timeouts: &TimeoutConfig) -> reqwest::Result<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(timeouts.connect_secs))
        .redirect(reqwest::redirect::Policy::none());
    if !upstream.system_proxy {
        builder = builder.no_proxy();
    }
    builder.build()
}

/// Forwards inbound requests to the upstream with a fresh bearer token.
#[derive(Clone)]
pub struct Forwarder {
    client: Client,
    tokens: TokenProvider,
    upstream: Upstream,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(client: Client, tokens: TokenProvider, upstream: Upstream, timeout: Duration) -> Self {
        Self {
            client,
            tokens,
            upstream,
            timeout,
        }
    }

    /// Forward one inbound request and return the upstream's response head.
    ///
    /// The response body is still unread; hand it to
    /// [`relay`](crate::http::relay::relay).
    pub async fn forward(&self, request: Request<Body>) -> Result<reqwest::Response, ProxyError> {
        let token = self
            .tokens
            .acquire(self.upstream.audience())
            .await
            .map_err(ProxyError::AuthUnavailable)?;

        let (parts, body) = request.into_parts();
        let target = self.upstream.target_url(&parts.uri)?;
        let headers = self.outbound_headers(&parts.headers, &token)?;

        tracing::info!(
            request_id = %request_id(&parts.headers),
            method = %parts.method,
            target = %target,
            "Forwarding request"
        );

        let mut outbound = self
            .client
            .request(parts.method, target)
            .headers(headers)
            .timeout(self.timeout);

        if body.size_hint().exact() != Some(0) {
            outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        outbound.send().await.map_err(|e| self.classify(e))
    }

    /// Inbound headers with `Authorization` and `Host` replaced.
    pub fn outbound_headers(&self, inbound: &HeaderMap, token: &IdentityToken) -> Result<HeaderMap, ProxyError> {
        let mut headers = inbound.clone();
        let bearer = token.bearer_header().map_err(ProxyError::AuthUnavailable)?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(HOST, self.upstream.host().clone());
        Ok(headers)
    }

    fn classify(&self, err: reqwest::Error) -> ProxyError {
        if err.is_timeout() {
            ProxyError::UpstreamTimeout(self.timeout)
        } else {
            ProxyError::UpstreamUnreachable(error_chain(&err))
        }
    }
}

/// Render an error and its sources on one line.
fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
