//! Identity tokens from a service account key file.
//!
//! The key signs a short-lived assertion naming the target audience, which
//! the OAuth token endpoint exchanges for a Google-signed ID token.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::auth::issuer::TokenIssuer;
use crate::auth::token::{Audience, IdentityToken, TokenError};

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Deserialize)]
struct KeyFile {
    #[serde(rename = "type")]
    kind: String,
    client_email: Option<String>,
    private_key: Option<String>,
    private_key_id: Option<String>,
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    target_audience: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

/// Issuer backed by a `service_account` JSON key.
#[derive(Clone)]
pub struct ServiceAccountIssuer {
    client: Client,
    client_email: String,
    key_id: Option<String>,
    key: EncodingKey,
    token_uri: String,
    timeout: Duration,
}

impl ServiceAccountIssuer {
    /// Read and parse a key file.
    pub fn from_file(client: Client, path: &Path, timeout: Duration) -> Result<Self, TokenError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TokenError::MissingCredentials(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(client, &content, timeout)
    }

    /// Parse key file contents.
    pub fn from_json(client: Client, json: &str, timeout: Duration) -> Result<Self, TokenError> {
        let file: KeyFile = serde_json::from_str(json)
            .map_err(|e| TokenError::InvalidCredentials(format!("key file is not valid JSON: {}", e)))?;

        if file.kind != "service_account" {
            return Err(TokenError::InvalidCredentials(format!(
                "credentials of type '{}' cannot mint ID tokens; use a service_account key",
                file.kind
            )));
        }

        let missing = |field: &str| TokenError::InvalidCredentials(format!("key file has no {}", field));
        let client_email = file.client_email.ok_or_else(|| missing("client_email"))?;
        let pem = file.private_key.ok_or_else(|| missing("private_key"))?;
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| TokenError::InvalidCredentials(format!("private_key: {}", e)))?;

        Ok(Self {
            client,
            client_email,
            key_id: file.private_key_id,
            key,
            token_uri: file.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            timeout,
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    fn sign_assertion(&self, audience: &Audience) -> Result<String, TokenError> {
        let iat = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TokenError::Issuer(e.to_string()))?
            .as_secs();

        let claims = AssertionClaims {
            iss: &self.client_email,
            sub: &self.client_email,
            aud: &self.token_uri,
            target_audience: audience.as_str(),
            iat,
            exp: iat + ASSERTION_LIFETIME.as_secs(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();

        jsonwebtoken::encode(&header, &claims, &self.key)
            .map_err(|e| TokenError::InvalidCredentials(format!("signing assertion: {}", e)))
    }
}

#[async_trait]
impl TokenIssuer for ServiceAccountIssuer {
    fn name(&self) -> &'static str {
        "service_account"
    }

    async fn issue(&self, audience: &Audience) -> Result<IdentityToken, TokenError> {
        let assertion = self.sign_assertion(audience)?;

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TokenError::Timeout(self.timeout.as_secs())
                } else {
                    TokenError::Issuer(format!("token endpoint {}: {}", self.token_uri, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Issuer(format!(
                "token endpoint returned {}: {}",
                status,
                body.trim()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Malformed(e.to_string()))?;

        let id_token = body
            .id_token
            .ok_or_else(|| TokenError::Malformed("response has no id_token".into()))?;
        IdentityToken::new(id_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = include_str!("../../tests/fixtures/test-rsa-key.pem");

    fn key_json(token_uri: &str) -> String {
        serde_json::json!({
            "type": "service_account",
            "project_id": "demo",
            "private_key_id": "key-1",
            "private_key": TEST_KEY,
            "client_email": "proxy@demo.iam.gserviceaccount.com",
            "token_uri": token_uri,
        })
        .to_string()
    }

    #[test]
    fn test_rejects_user_credentials() {
        let json = r#"{"type":"authorized_user","client_id":"x","refresh_token":"y"}"#;
        let err = ServiceAccountIssuer::from_json(Client::new(), json, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, TokenError::InvalidCredentials(_)));
        assert!(err.to_string().contains("authorized_user"));
    }

    #[test]
    fn test_rejects_bad_key() {
        let json = serde_json::json!({
            "type": "service_account",
            "client_email": "a@b",
            "private_key": "not a pem",
        })
        .to_string();
        assert!(ServiceAccountIssuer::from_json(Client::new(), &json, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = ServiceAccountIssuer::from_file(
            Client::new(),
            Path::new("/nonexistent/key.json"),
            Duration::from_secs(1),
        )
        .err()
        .unwrap();
        assert!(matches!(err, TokenError::MissingCredentials(_)));
    }

    #[tokio::test]
    async fn test_exchanges_signed_assertion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id_token": "google-signed-id-token"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token_uri = format!("{}/token", server.uri());
        let issuer = ServiceAccountIssuer::from_json(Client::new(), &key_json(&token_uri), Duration::from_secs(5)).unwrap();
        let aud = Audience::parse("https://svc.example").unwrap();

        let token = issuer.issue(&aud).await.unwrap();
        assert_eq!(token.secret(), "google-signed-id-token");

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8(requests[0].body.clone()).unwrap();
        let assertion = body
            .split('&')
            .find_map(|pair| pair.strip_prefix("assertion="))
            .unwrap();
        let payload = assertion.split('.').nth(1).unwrap();
        let claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap();

        assert_eq!(claims["target_audience"], "https://svc.example");
        assert_eq!(claims["iss"], "proxy@demo.iam.gserviceaccount.com");
        assert_eq!(claims["aud"], token_uri.as_str());
    }

    #[tokio::test]
    async fn test_endpoint_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let token_uri = format!("{}/token", server.uri());
        let issuer = ServiceAccountIssuer::from_json(Client::new(), &key_json(&token_uri), Duration::from_secs(5)).unwrap();
        let aud = Audience::parse("https://svc.example").unwrap();

        let err = issuer.issue(&aud).await.unwrap_err();
        assert!(err.to_string().contains("invalid_grant"));
    }
}
