//! Authenticating reverse proxy.
//!
//! Forwards every request to a single upstream, attaching a freshly minted
//! identity token whose audience is the upstream's base URL.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                   AUTH PROXY                          │
//!                      │                                                       │
//!   Client Request     │  ┌─────────┐   ┌──────────┐   ┌───────────────┐       │
//!   ───────────────────┼─▶│  http   │──▶│  auth    │──▶│   forward     │───────┼──▶ Upstream
//!                      │  │ server  │   │ provider │   │ (token, Host, │       │
//!                      │  └─────────┘   └──────────┘   │  streaming)   │       │
//!                      │                     │         └───────┬───────┘       │
//!                      │                     ▼                 │               │
//!                      │              ┌────────────┐           ▼               │
//!                      │              │ issuer:    │    ┌─────────────┐        │
//!   Client Response    │              │ metadata / │    │    relay    │◀───────┼─── Upstream
//!   ◀──────────────────┼──────────────│ key file   │◀───│ (filter hdr,│        │    Response
//!                      │              └────────────┘    │  stream)    │        │
//!                      │                                └─────────────┘        │
//!                      │  config · observability · lifecycle (cross-cutting)   │
//!                      └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Configuration
//! - `UPSTREAM_SERVER_URL` (required): upstream base URL and token audience
//! - `PORT` (default 8080)
//! - `--config <file>` / `AUTH_PROXY_CONFIG`: optional TOML file

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use auth_proxy::auth::{ambient_issuer, issuer_client};
use auth_proxy::config::{load_config, ObservabilityConfig};
use auth_proxy::error::StartupError;
use auth_proxy::lifecycle::{signals, Shutdown};
use auth_proxy::observability::{logging, metrics};
use auth_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "auth-proxy")]
#[command(about = "Reverse proxy that authenticates to its upstream with identity tokens", long_about = None)]
struct Cli {
    /// Optional TOML configuration file; environment variables override it.
    #[arg(short, long, env = "AUTH_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            logging::init_logging(&ObservabilityConfig::default());
            tracing::error!(error = %e, "Invalid configuration, refusing to start");
            return Err(StartupError::from(e).into());
        }
    };

    logging::init_logging(&config.observability);
    tracing::info!("auth-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        upstream = %config.upstream.url,
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        token_cache = config.token.cache_enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: std::net::SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let client = issuer_client(&config.token).map_err(StartupError::from)?;
    let issuer = ambient_issuer(&config.token, client).map_err(StartupError::from)?;

    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config, issuer)?;

    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(&shutdown);

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
