//! The token-issuing capability.

use async_trait::async_trait;

use crate::auth::token::{Audience, IdentityToken, TokenError};

/// Mints a signed identity token bound to an audience.
///
/// Implementations wrap whatever ambient credentials the process has. They
/// are injected into [`TokenProvider`](crate::auth::TokenProvider) at
/// construction so tests can substitute a fake without touching the
/// environment.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Mint a fresh token for `audience`.
    async fn issue(&self, audience: &Audience) -> Result<IdentityToken, TokenError>;
}
