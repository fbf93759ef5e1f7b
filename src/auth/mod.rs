//! Identity token subsystem.
//!
//! # Data Flow
//! ```text
//! startup:
//!     TokenConfig → ambient_issuer()
//!         credentials file (config or GOOGLE_APPLICATION_CREDENTIALS) → service_account.rs
//!         otherwise                                                  → metadata.rs
//!         token.cache_enabled                                        → wrapped by cache.rs
//!     → TokenProvider (provider.rs)
//!
//! per request:
//!     TokenProvider::acquire(audience) → TokenIssuer::issue → IdentityToken
//! ```
//!
//! # Design Decisions
//! - Credentials are an injected capability (`TokenIssuer`), never read from
//!   the environment inside the request path
//! - Tokens are fetched per request unless caching is explicitly enabled
//! - Token secrets are redacted in every `Debug`/`Display` output

pub mod cache;
pub mod issuer;
pub mod metadata;
pub mod provider;
pub mod service_account;
pub mod token;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use cache::CachingIssuer;
pub use issuer::TokenIssuer;
pub use metadata::MetadataServerIssuer;
pub use provider::TokenProvider;
pub use service_account::ServiceAccountIssuer;
pub use token::{Audience, IdentityToken, TokenError};

use crate::config::TokenConfig;

/// True when tokens come from the metadata server rather than a key file.
pub fn uses_metadata_server(config: &TokenConfig) -> bool {
    config.credentials_file.is_none()
}

/// Client for issuer calls.
///
/// The metadata server is only reachable directly from the workload, so
/// `HTTP(S)_PROXY` is ignored when it is the issuer. Calls to the OAuth
/// token endpoint honour the system proxy.
pub fn issuer_client(config: &TokenConfig) -> reqwest::Result<reqwest::Client> {
    let builder = reqwest::Client::builder();
    if uses_metadata_server(config) {
        builder.no_proxy().build()
    } else {
        builder.build()
    }
}

/// Resolve the issuer for this process's ambient credentials.
///
/// An unreadable or unusable key file is an error here, at startup. An
/// unreachable metadata server only surfaces per request.
pub fn ambient_issuer(
    config: &TokenConfig,
    client: reqwest::Client,
) -> Result<Arc<dyn TokenIssuer>, TokenError> {
    let timeout = Duration::from_secs(config.issuer_timeout_secs);

    let issuer: Arc<dyn TokenIssuer> = match &config.credentials_file {
        Some(path) => {
            let issuer = ServiceAccountIssuer::from_file(client, Path::new(path), timeout)?;
            tracing::info!(
                credentials_file = %path,
                client_email = %issuer.client_email(),
                "Using service account credentials"
            );
            Arc::new(issuer)
        }
        None => {
            let issuer = MetadataServerIssuer::new(client, config.metadata_host.as_deref(), timeout);
            tracing::info!(metadata_server = %issuer.base_url(), "Using metadata server credentials");
            Arc::new(issuer)
        }
    };

    if config.cache_enabled {
        tracing::info!(refresh_skew_secs = config.refresh_skew_secs, "Token cache enabled");
        return Ok(Arc::new(CachingIssuer::new(
            issuer,
            Duration::from_secs(config.refresh_skew_secs),
        )));
    }

    Ok(issuer)
}
