//! Identity tokens from the compute metadata server.
//!
//! Workloads on Cloud Run, GKE and GCE get a token for the attached service
//! account by asking the local metadata server. No key material is present
//! in the process.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::auth::issuer::TokenIssuer;
use crate::auth::token::{Audience, IdentityToken, TokenError};

/// Default metadata server host.
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

/// Issuer backed by the metadata server identity endpoint.
#[derive(Debug, Clone)]
pub struct MetadataServerIssuer {
    client: Client,
    /// Base URL, e.g. `http://metadata.google.internal`.
    base_url: String,
    timeout: Duration,
}

impl MetadataServerIssuer {
    /// Create an issuer for `host` (a bare host, `host:port`, or a full
    /// `http://` URL for tests).
    pub fn new(client: Client, host: Option<&str>, timeout: Duration) -> Self {
        let host = host.unwrap_or(DEFAULT_METADATA_HOST).trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };

        Self {
            client,
            base_url,
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TokenIssuer for MetadataServerIssuer {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn issue(&self, audience: &Audience) -> Result<IdentityToken, TokenError> {
        let url = format!("{}{}", self.base_url, IDENTITY_PATH);

        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .query(&[("audience", audience.as_str()), ("format", "full")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TokenError::Timeout(self.timeout.as_secs())
                } else if e.is_connect() {
                    TokenError::MissingCredentials(format!(
                        "metadata server at {} unreachable: {}",
                        self.base_url, e
                    ))
                } else {
                    TokenError::Issuer(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TokenError::Issuer(format!("reading metadata response: {}", e)))?;

        if !status.is_success() {
            return Err(TokenError::Issuer(format!(
                "metadata server returned {}: {}",
                status,
                body.trim()
            )));
        }

        IdentityToken::new(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn issuer(server: &MockServer) -> MetadataServerIssuer {
        MetadataServerIssuer::new(Client::new(), Some(server.uri().as_str()), Duration::from_secs(5))
    }

    #[test]
    fn test_host_normalisation() {
        let i = MetadataServerIssuer::new(Client::new(), None, Duration::from_secs(1));
        assert_eq!(i.base_url(), "http://metadata.google.internal");

        let i = MetadataServerIssuer::new(Client::new(), Some("169.254.169.254:80"), Duration::from_secs(1));
        assert_eq!(i.base_url(), "http://169.254.169.254:80");
    }

    #[tokio::test]
    async fn test_issues_token_for_audience() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(IDENTITY_PATH))
            .and(header("Metadata-Flavor", "Google"))
            .and(query_param("audience", "https://svc.example"))
            .and(query_param("format", "full"))
            .respond_with(ResponseTemplate::new(200).set_body_string("minted-token\n"))
            .expect(1)
            .mount(&server)
            .await;

        let aud = Audience::parse("https://svc.example").unwrap();
        let token = issuer(&server).issue(&aud).await.unwrap();
        assert_eq!(token.secret(), "minted-token");
    }

    #[tokio::test]
    async fn test_error_status_is_issuer_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no service account"))
            .mount(&server)
            .await;

        let aud = Audience::parse("https://svc.example").unwrap();
        let err = issuer(&server).issue(&aud).await.unwrap_err();
        assert!(matches!(err, TokenError::Issuer(_)));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_unreachable_metadata_server() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let issuer = MetadataServerIssuer::new(Client::new(), Some(addr.to_string().as_str()), Duration::from_secs(2));
        let aud = Audience::parse("https://svc.example").unwrap();
        let err = issuer.issue(&aud).await.unwrap_err();
        assert!(matches!(err, TokenError::MissingCredentials(_)));
    }
}
