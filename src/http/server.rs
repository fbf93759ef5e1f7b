//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the catch-all proxy handler
//! - Wire up middleware (request ID, tracing, concurrency limit)
//! - Bind server to listener with graceful shutdown
//! - Run the pipeline per request: method policy → forward → relay
//! - Map per-request failures to plain-text responses

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{TokenIssuer, TokenProvider};
use crate::config::{ConfigError, ProxyConfig};
use crate::error::{ProxyError, StartupError};
use crate::http::forward::{build_client, Forwarder, Upstream};
use crate::http::relay::relay;
use crate::http::request::{
    propagate_request_id_layer, request_id, set_request_id_layer, MethodPolicy,
};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Arc<Forwarder>,
    pub methods: Arc<MethodPolicy>,
}

/// HTTP server for the authenticating proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration and token issuer.
    pub fn new(config: ProxyConfig, issuer: Arc<dyn TokenIssuer>) -> Result<Self, StartupError> {
        let upstream = Upstream::parse(&config.upstream.url)
            .map_err(|e| ConfigError::Validation(vec![e]))?;
        let client = build_client(&config.upstream, &config.timeouts)?;

        let forwarder = Forwarder::new(
            client,
            TokenProvider::new(issuer),
            upstream,
            Duration::from_secs(config.timeouts.request_secs),
        );

        let state = AppState {
            forwarder: Arc::new(forwarder),
            methods: Arc::new(MethodPolicy::from_config(&config.listener.allowed_methods)),
        };

        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let router = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer());

        if config.listener.max_connections > 0 {
            router.layer(GlobalConcurrencyLimitLayer::new(config.listener.max_connections))
        } else {
            router
        }
    }

    #[cfg(test)]
    fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server until `shutdown` is triggered, then drain in-flight
    /// requests.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.url,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Catch-all proxy handler.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start_time = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request_id(request.headers()).to_string();

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        "Proxying request"
    );

    let result = async {
        state.methods.check(&method)?;
        let upstream = state.forwarder.forward(request).await?;
        Ok::<_, ProxyError>(relay(upstream))
    }
    .await;

    match result {
        Ok(response) => {
            tracing::debug!(
                request_id = %request_id,
                status = response.status().as_u16(),
                elapsed_ms = start_time.elapsed().as_millis() as u64,
                "Upstream responded"
            );
            metrics::record_request(method.as_str(), response.status().as_u16(), "relayed", start_time);
            response
        }
        Err(err) => {
            match &err {
                ProxyError::MethodNotAllowed(_) | ProxyError::InvalidRequest(_) => {
                    tracing::warn!(request_id = %request_id, path = %path, error = %err, "Request rejected")
                }
                _ => tracing::error!(
                    request_id = %request_id,
                    path = %path,
                    kind = err.kind(),
                    error = %err,
                    "Forwarding failed"
                ),
            }
            metrics::record_request(method.as_str(), err.status().as_u16(), err.kind(), start_time);
            err.into_response()
        }
    }
}
