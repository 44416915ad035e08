//! Authentication seam for the OneDrive adapter.
//!
//! Token acquisition and refresh live outside this crate. The adapter only asks
//! an [`AuthProvider`] for a bearer token before each request and surfaces
//! authorization failures as [`AuthenticationError`]s.
//!
//! ```no_run
//! use integrations_onedrive::auth::{AuthProvider, StaticTokenProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = StaticTokenProvider::new("eyJ0eXAiOi...");
//! let token = provider.get_access_token().await?;
//! assert_eq!(token.token_type, "Bearer");
//! # Ok(())
//! # }
//! ```

use crate::errors::AuthenticationError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Token expiry buffer (5 minutes).
pub const TOKEN_EXPIRY_BUFFER_SECONDS: i64 = 300;

/// OAuth 2.0 scopes for OneDrive / Microsoft Graph.
pub mod scopes {
    /// Read and write access to the user's files.
    pub const FILES_READ_WRITE: &str = "Files.ReadWrite";

    /// Read and write access to all files the user can access, including shared ones.
    pub const FILES_READ_WRITE_ALL: &str = "Files.ReadWrite.All";

    /// Refresh token issuance.
    pub const OFFLINE_ACCESS: &str = "offline_access";
}

/// Authentication provider abstraction.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Get an access token for API requests.
    async fn get_access_token(&self) -> Result<AccessToken, AuthenticationError>;

    /// Check if the current token is expired.
    fn is_expired(&self) -> bool;
}

/// Access token with metadata.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The token string.
    pub token: SecretString,

    /// Token type (usually "Bearer").
    pub token_type: String,

    /// Expiration time, if known.
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    /// Creates a new bearer token without a known expiry.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::new(token.into()),
            token_type: "Bearer".to_string(),
            expires_at: None,
        }
    }

    /// Sets the expiration time.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Checks if the token is expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |at| Utc::now() >= at)
    }

    /// Checks if the token should be replaced soon (within 5 minutes of expiry).
    pub fn needs_refresh(&self) -> bool {
        self.expires_at.map_or(false, |at| {
            Utc::now() >= at - Duration::seconds(TOKEN_EXPIRY_BUFFER_SECONDS)
        })
    }

    /// Returns the authorization header value.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.token.expose_secret())
    }
}

/// Provider handing out a token supplied by the caller.
///
/// The token layer swaps in fresh tokens with [`StaticTokenProvider::set_token`];
/// clones share the same slot.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: Arc<RwLock<AccessToken>>,
}

impl StaticTokenProvider {
    /// Creates a provider for a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self::from_token(AccessToken::bearer(token))
    }

    /// Creates a provider from a fully specified token.
    pub fn from_token(token: AccessToken) -> Self {
        Self {
            token: Arc::new(RwLock::new(token)),
        }
    }

    /// Replaces the current token.
    pub async fn set_token(&self, token: AccessToken) {
        *self.token.write().await = token;
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn get_access_token(&self) -> Result<AccessToken, AuthenticationError> {
        let token = self.token.read().await.clone();
        if token.is_expired() {
            return Err(AuthenticationError::ExpiredToken(
                "access token expired and no refreshed token was supplied".to_string(),
            ));
        }
        Ok(token)
    }

    fn is_expired(&self) -> bool {
        self.token
            .try_read()
            .map(|token| token.is_expired())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_provider_returns_token() {
        let provider = StaticTokenProvider::new("abc");
        let token = provider.get_access_token().await.unwrap();
        assert_eq!(token.authorization_header(), "Bearer abc");
        assert!(!provider.is_expired());
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let expired = AccessToken::bearer("old").with_expiry(Utc::now() - Duration::seconds(10));
        let provider = StaticTokenProvider::from_token(expired);
        assert!(provider.is_expired());
        assert!(matches!(
            provider.get_access_token().await,
            Err(AuthenticationError::ExpiredToken(_))
        ));

        provider.set_token(AccessToken::bearer("new")).await;
        let token = provider.get_access_token().await.unwrap();
        assert_eq!(token.token.expose_secret(), "new");
    }

    #[test]
    fn test_needs_refresh() {
        let soon = AccessToken::bearer("t").with_expiry(Utc::now() + Duration::seconds(60));
        assert!(soon.needs_refresh());
        assert!(!soon.is_expired());

        let later = AccessToken::bearer("t").with_expiry(Utc::now() + Duration::hours(1));
        assert!(!later.needs_refresh());
    }
}
