//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;

use auth_proxy::auth::{Audience, IdentityToken, TokenError, TokenIssuer};
use auth_proxy::{HttpServer, ProxyConfig, Shutdown};

pub const TEST_TOKEN: &str = "test-identity-token";

/// Issuer returning a fixed token (or failing), counting calls.
pub struct FakeIssuer {
    pub calls: AtomicU32,
    fail_with: Option<String>,
    last_audience: std::sync::Mutex<Option<String>>,
}

impl FakeIssuer {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_with: None,
            last_audience: std::sync::Mutex::new(None),
        })
    }

    pub fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_with: Some(reason.to_string()),
            last_audience: std::sync::Mutex::new(None),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn last_audience(&self) -> Option<String> {
        self.last_audience.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenIssuer for FakeIssuer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn issue(&self, audience: &Audience) -> Result<IdentityToken, TokenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_audience.lock().unwrap() = Some(audience.as_str().to_string());
        match &self.fail_with {
            Some(reason) => Err(TokenError::MissingCredentials(reason.clone())),
            None => IdentityToken::new(TEST_TOKEN),
        }
    }
}

/// Serve `app` on an ephemeral local port.
pub async fn start_upstream(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// An address nothing listens on.
#[allow(dead_code)]
pub fn closed_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// A running proxy instance.
pub struct TestProxy {
    pub addr: SocketAddr,
    shutdown: Shutdown,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start the proxy in front of `upstream_url`.
pub async fn spawn_proxy<F>(upstream_url: &str, issuer: Arc<dyn TokenIssuer>, tweak: F) -> TestProxy
where
    F: FnOnce(&mut ProxyConfig),
{
    let mut config = ProxyConfig::default();
    config.upstream.url = upstream_url.to_string();
    config.upstream.system_proxy = false;
    config.listener.bind_address = "127.0.0.1:0".to_string();
    tweak(&mut config);

    let server = HttpServer::new(config, issuer).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestProxy { addr, shutdown }
}

/// Client that never pools or goes through a system proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap()
}
