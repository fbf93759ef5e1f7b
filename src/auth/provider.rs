//! Per-request token acquisition.

use std::sync::Arc;
use std::time::Instant;

use crate::auth::issuer::TokenIssuer;
use crate::auth::token::{Audience, IdentityToken, TokenError};
use crate::observability::metrics;

/// Produces a bearer credential for an audience on every call.
///
/// Holds no token state itself; whether tokens are reused is decided by the
/// injected issuer (see [`CachingIssuer`](crate::auth::CachingIssuer)).
#[derive(Clone)]
pub struct TokenProvider {
    issuer: Arc<dyn TokenIssuer>,
}

impl TokenProvider {
    pub fn new(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self { issuer }
    }

    pub fn issuer_name(&self) -> &'static str {
        self.issuer.name()
    }

    /// Acquire a token bound to `audience`.
    pub async fn acquire(&self, audience: &Audience) -> Result<IdentityToken, TokenError> {
        let start = Instant::now();
        let result = self.issuer.issue(audience).await;

        match &result {
            Ok(token) => {
                tracing::debug!(
                    issuer = self.issuer.name(),
                    audience = %audience,
                    token_len = token.secret().len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Identity token acquired"
                );
                metrics::record_token_acquisition(self.issuer.name(), true);
            }
            Err(e) => {
                tracing::warn!(
                    issuer = self.issuer.name(),
                    audience = %audience,
                    error = %e,
                    "Identity token acquisition failed"
                );
                metrics::record_token_acquisition(self.issuer.name(), false);
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingIssuer {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TokenIssuer for CountingIssuer {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn issue(&self, audience: &Audience) -> Result<IdentityToken, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            IdentityToken::new(format!("{}-{}", audience.as_str().len(), n))
        }
    }

    #[tokio::test]
    async fn test_fresh_token_every_call() {
        let issuer = Arc::new(CountingIssuer { calls: AtomicU32::new(0) });
        let provider = TokenProvider::new(issuer.clone());
        let aud = Audience::parse("https://svc.example").unwrap();

        let a = provider.acquire(&aud).await.unwrap();
        let b = provider.acquire(&aud).await.unwrap();

        assert_ne!(a, b);
        assert_eq!(issuer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(provider.issuer_name(), "counting");
    }
}
