//! Authenticating reverse proxy library.
//!
//! Forwards every request to one upstream with a freshly minted identity
//! token scoped to that upstream, and streams the response back.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use auth::{TokenIssuer, TokenProvider};
pub use config::schema::ProxyConfig;
pub use error::{ProxyError, StartupError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
