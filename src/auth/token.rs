//! Identity token and audience value objects.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::HeaderValue;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

/// Errors that can occur while acquiring an identity token.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No ambient credentials are available to the process.
    #[error("no credentials available: {0}")]
    MissingCredentials(String),

    /// Credentials exist but could not be used.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The audience is not an absolute URL.
    #[error("invalid audience '{0}'")]
    InvalidAudience(String),

    /// The issuer could not be reached or rejected the request.
    #[error("token issuer failed: {0}")]
    Issuer(String),

    /// The issuer did not answer in time.
    #[error("token issuer timed out after {0} seconds")]
    Timeout(u64),

    /// The issuer answered with something that is not a usable token.
    #[error("issuer returned an unusable token: {0}")]
    Malformed(String),
}

/// The audience a token is scoped to: the upstream base URL, kept exactly as
/// configured so the `aud` claim matches what the upstream expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Audience(String);

impl Audience {
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let url = Url::parse(raw).map_err(|_| TokenError::InvalidAudience(raw.to_string()))?;
        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(TokenError::InvalidAudience(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signed bearer token.
///
/// `Debug` and `Display` never reveal the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityToken {
    secret: String,
    expires_at: Option<SystemTime>,
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<u64>,
}

impl IdentityToken {
    /// Wrap a raw token. JWT-shaped tokens have their `exp` claim read
    /// (unverified) so callers can tell when the token goes stale.
    pub fn new(secret: impl Into<String>) -> Result<Self, TokenError> {
        let secret = secret.into();
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            return Err(TokenError::Malformed("empty token".into()));
        }
        if HeaderValue::from_str(trimmed).is_err() {
            return Err(TokenError::Malformed("token is not a valid header value".into()));
        }

        let expires_at = jwt_expiry(trimmed);
        Ok(Self {
            secret: trimmed.to_string(),
            expires_at,
        })
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<SystemTime> {
        self.expires_at
    }

    /// True if the token expires within `skew` from now. Tokens without a
    /// known expiry are always treated as stale, as is any skew too large to
    /// add to the current time.
    pub fn is_stale(&self, skew: Duration) -> bool {
        match self.expires_at {
            Some(exp) => SystemTime::now()
                .checked_add(skew)
                .map_or(true, |deadline| deadline >= exp),
            None => true,
        }
    }

    /// `Bearer {token}` as a sensitive header value.
    pub fn bearer_header(&self) -> Result<HeaderValue, TokenError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.secret))
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityToken")
            .field("len", &self.secret.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl fmt::Display for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<redacted token, {} bytes>", self.secret.len())
    }
}

fn jwt_expiry(token: &str) -> Option<SystemTime> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    // An `exp` beyond what SystemTime can represent is treated as unknown.
    UNIX_EPOCH.checked_add(Duration::from_secs(claim.exp?))
}

#[cfg(test)]
pub(crate) fn fake_jwt(exp: u64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"aud":"https://svc.example","exp":{}}}"#, exp));
    format!("{}.{}.c2lnbmF0dXJl", header, payload)
}
