//! Access token boundary.
//!
//! OAuth flows and refresh logic belong to whoever implements
//! [`TokenSource`]. The client only asks for a token before each request and
//! refuses to send one that is already known to be expired.

use std::fmt;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::{ErrorKind, Result};

#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<OffsetDateTime>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<OffsetDateTime>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies access tokens on demand.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<AccessToken>;
}

/// Hands out the same token for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct StaticToken(AccessToken);

impl StaticToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(AccessToken::new(secret, None))
    }

    pub fn expiring(secret: impl Into<String>, expires_at: OffsetDateTime) -> Self {
        Self(AccessToken::new(secret, Some(expires_at)))
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<AccessToken> {
        Ok(self.0.clone())
    }
}

/// Fetch a token and make sure it is still usable.
pub(crate) async fn fresh_token(source: &dyn TokenSource) -> Result<AccessToken> {
    let token = source.token().await?;
    if token.secret.is_empty() {
        exn::bail!(ErrorKind::TokenUnavailable);
    }
    if token.is_expired() {
        exn::bail!(ErrorKind::TokenExpired);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_debug_redacts_secret() {
        let token = AccessToken::new("ya29.secret", None);
        let debug = format!("{token:?}");
        assert!(!debug.contains("ya29"));
        assert!(debug.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_expired_token_is_refused() {
        let source = StaticToken::expiring("abc", OffsetDateTime::now_utc() - Duration::minutes(1));
        let err = fresh_token(&source).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TokenExpired));
    }

    #[tokio::test]
    async fn test_empty_token_is_unavailable() {
        let err = fresh_token(&StaticToken::new("")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TokenUnavailable));
    }

    #[tokio::test]
    async fn test_valid_token_passes() {
        let source = StaticToken::expiring("abc", OffsetDateTime::now_utc() + Duration::hours(1));
        assert_eq!(fresh_token(&source).await.unwrap().secret(), "abc");
    }
}
