//! Optional token reuse.
//!
//! Wraps another issuer and hands out the same token per audience until it
//! is within `refresh_skew` of expiring. A single async mutex serialises
//! refreshes so concurrent requests do not stampede the issuer. Tokens
//! without a readable `exp` claim are never cached.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::auth::issuer::TokenIssuer;
use crate::auth::token::{Audience, IdentityToken, TokenError};

pub struct CachingIssuer {
    inner: Arc<dyn TokenIssuer>,
    refresh_skew: Duration,
    tokens: Mutex<HashMap<Audience, IdentityToken>>,
}

impl CachingIssuer {
    pub fn new(inner: Arc<dyn TokenIssuer>, refresh_skew: Duration) -> Self {
        Self {
            inner,
            refresh_skew,
            tokens: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl TokenIssuer for CachingIssuer {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn issue(&self, audience: &Audience) -> Result<IdentityToken, TokenError> {
        let mut tokens = self.tokens.lock().await;

        if let Some(token) = tokens.get(audience) {
            if !token.is_stale(self.refresh_skew) {
                return Ok(token.clone());
            }
        }

        let token = self.inner.issue(audience).await;
        match &token {
            Ok(fresh) if !fresh.is_stale(self.refresh_skew) => {
                tokens.insert(audience.clone(), fresh.clone());
            }
            _ => {
                tokens.remove(audience);
            }
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::fake_jwt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    struct JwtIssuer {
        calls: AtomicU32,
        lifetime_secs: u64,
    }

    #[async_trait]
    impl TokenIssuer for JwtIssuer {
        fn name(&self) -> &'static str {
            "jwt"
        }

        async fn issue(&self, _audience: &Audience) -> Result<IdentityToken, TokenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
            IdentityToken::new(fake_jwt(now.saturating_add(self.lifetime_secs)))
        }
    }

    fn cache(lifetime_secs: u64) -> (Arc<JwtIssuer>, CachingIssuer) {
        let inner = Arc::new(JwtIssuer { calls: AtomicU32::new(0), lifetime_secs });
        let cache = CachingIssuer::new(inner.clone(), Duration::from_secs(60));
        (inner, cache)
    }

    #[tokio::test]
    async fn test_reuses_valid_token() {
        let (inner, cache) = cache(3600);
        let aud = Audience::parse("https://svc.example").unwrap();

        let a = cache.issue(&aud).await.unwrap();
        let b = cache.issue(&aud).await.unwrap();

        assert_eq!(a, b);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refreshes_near_expiry() {
        // Lifetime shorter than the skew: every token is already stale.
        let (inner, cache) = cache(30);
        let aud = Audience::parse("https://svc.example").unwrap();

        cache.issue(&aud).await.unwrap();
        cache.issue(&aud).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_audiences_are_separate() {
        let (inner, cache) = cache(3600);

        cache.issue(&Audience::parse("https://a.example").unwrap()).await.unwrap();
        cache.issue(&Audience::parse("https://b.example").unwrap()).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let (inner, cache) = cache(3600);
        let cache = Arc::new(cache);
        let aud = Audience::parse("https://svc.example").unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                let aud = aud.clone();
                tokio::spawn(async move { cache.issue(&aud).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_expiry_is_not_cached() {
        let (inner, cache) = cache(u64::MAX);
        let aud = Audience::parse("https://svc.example").unwrap();

        cache.issue(&aud).await.unwrap();
        cache.issue(&aud).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }
}
