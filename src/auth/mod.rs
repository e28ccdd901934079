//! Authentication helpers and token providers.
//!
//! Vertex calls need a short-lived bearer token minted from a service
//! account; [`CredentialBroker`] does the minting and caching, and
//! [`TokenProvider`] is the seam providers call through.

pub mod cache;
pub mod service_account;

use async_trait::async_trait;

use crate::error::EngineError;

pub use cache::{InMemoryTokenCache, TokenCache};
pub use service_account::{
    CachedToken, CredentialBroker, ServiceAccountCredentials, ServiceAccountTokenProvider,
};

/// Supplies bearer tokens for the `Authorization` header.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, EngineError>;

    /// Obtain a token without reusing a cached one. Called after an upstream
    /// rejected the current token.
    async fn refresh(&self) -> Result<String, EngineError> {
        self.token().await
    }
}

/// A static token, for tests and for tokens managed outside the engine.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String, EngineError> {
        Ok(self.token.clone())
    }
}
