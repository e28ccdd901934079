//! Service-account credentials and the OAuth2 JWT-bearer grant.
//!
//! The broker signs an RS256 assertion with the account's private key, trades
//! it for an access token at the token endpoint, and caches the token in an
//! injected [`TokenCache`] for 55 minutes against the provider's 60-minute
//! lifetime. No lock is held while minting: concurrent misses may each mint
//! a token, which is harmless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{TokenCache, TokenProvider};
use crate::error::EngineError;
use crate::telemetry::mask_sensitive_value;

/// Default Google OAuth token endpoint
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Default scope for Vertex AI access
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Lifetime requested in the assertion.
const ASSERTION_LIFETIME_SECS: i64 = 3600;
/// How long a minted token is served from cache.
pub const TOKEN_CACHE_TTL_SECS: i64 = 3300;
const CACHE_KEY_PREFIX: &str = "oauth_token:";
const BODY_SAMPLE_CHARS: usize = 200;

/// Service account fields required for the JWT flow.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountCredentials {
    pub client_email: String,
    pub private_key: SecretString,
    #[serde(default)]
    pub token_uri: Option<String>,
    /// OAuth scopes; empty means cloud-platform.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Present in downloaded key files; used as the Vertex project fallback.
    #[serde(default)]
    pub project_id: Option<String>,
}

impl ServiceAccountCredentials {
    pub fn new(client_email: impl Into<String>, private_key: impl Into<String>) -> Self {
        Self {
            client_email: client_email.into(),
            private_key: SecretString::from(private_key.into()),
            token_uri: None,
            scopes: Vec::new(),
            project_id: None,
        }
    }

    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = Some(token_uri.into());
        self
    }

    /// Parse a service account key file.
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str::<Self>(json)
            .map_err(|e| EngineError::ConfigurationError(format!("Invalid service account JSON: {e}")))
    }

    pub fn scope_string(&self) -> String {
        if self.scopes.is_empty() {
            DEFAULT_SCOPE.to_string()
        } else {
            self.scopes.join(" ")
        }
    }

    pub fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }

    pub fn cache_key(&self) -> String {
        format!("{CACHE_KEY_PREFIX}{}", self.client_email)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    sub: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Value stored in the token cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedToken {
    pub token: String,
    /// Unix seconds after which the entry must not be served.
    pub expires_at: i64,
}

/// Mints and caches service-account access tokens.
pub struct CredentialBroker {
    http: reqwest::Client,
    cache: Arc<dyn TokenCache>,
    timeout: Duration,
    #[cfg(test)]
    assertion_override: Option<String>,
}

impl CredentialBroker {
    pub fn new(http: reqwest::Client, cache: Arc<dyn TokenCache>) -> Self {
        Self {
            http,
            cache,
            timeout: Duration::from_secs(10),
            #[cfg(test)]
            assertion_override: None,
        }
    }

    /// Token endpoint timeout (default 10s).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    pub(crate) fn with_assertion_override(mut self, assertion: impl Into<String>) -> Self {
        self.assertion_override = Some(assertion.into());
        self
    }

    /// Return a valid access token, minting one on cache miss or staleness.
    pub async fn get_access_token(
        &self,
        creds: &ServiceAccountCredentials,
    ) -> Result<String, EngineError> {
        let key = creds.cache_key();
        let now = chrono::Utc::now().timestamp();

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<CachedToken>(&raw) {
                Ok(cached) if cached.expires_at > now => {
                    tracing::debug!(account = %creds.client_email, "using cached access token");
                    return Ok(cached.token);
                }
                Ok(_) => tracing::debug!(account = %creds.client_email, "cached access token is stale"),
                Err(e) => tracing::warn!(error = %e, "ignoring unreadable cached token"),
            },
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "token cache read failed, minting a new token"),
        }

        self.mint_and_store(creds, now).await
    }

    /// Mint a new token regardless of the cache and store it.
    pub async fn refresh_access_token(
        &self,
        creds: &ServiceAccountCredentials,
    ) -> Result<String, EngineError> {
        tracing::debug!(account = %creds.client_email, "forcing access token refresh");
        self.mint_and_store(creds, chrono::Utc::now().timestamp()).await
    }

    async fn mint_and_store(
        &self,
        creds: &ServiceAccountCredentials,
        now: i64,
    ) -> Result<String, EngineError> {
        let key = creds.cache_key();
        let token = self.mint(creds, now).await?;
        let entry = CachedToken {
            token: token.clone(),
            expires_at: now + TOKEN_CACHE_TTL_SECS,
        };
        let value = serde_json::to_string(&entry)?;
        if let Err(e) = self
            .cache
            .put(&key, value, Duration::from_secs(TOKEN_CACHE_TTL_SECS as u64))
            .await
        {
            tracing::warn!(error = %e, "token cache write failed");
        }
        Ok(token)
    }

    fn sign_assertion(
        &self,
        creds: &ServiceAccountCredentials,
        now: i64,
    ) -> Result<String, EngineError> {
        #[cfg(test)]
        if let Some(a) = &self.assertion_override {
            return Ok(a.clone());
        }
        let claims = Claims {
            iss: &creds.client_email,
            sub: &creds.client_email,
            scope: creds.scope_string(),
            aud: creds.token_uri(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        let key = EncodingKey::from_rsa_pem(creds.private_key.expose_secret().as_bytes())
            .map_err(|e| EngineError::CredentialError(format!("Invalid RSA private key (PEM): {e}")))?;
        encode(&header, &claims, &key)
            .map_err(|e| EngineError::CredentialError(format!("Failed to sign JWT: {e}")))
    }

    async fn mint(
        &self,
        creds: &ServiceAccountCredentials,
        now: i64,
    ) -> Result<String, EngineError> {
        let assertion = self.sign_assertion(creds, now)?;
        let form = [
            ("grant_type", JWT_BEARER_GRANT),
            ("assertion", assertion.as_str()),
        ];
        tracing::debug!(account = %creds.client_email, token_uri = %creds.token_uri(), "minting access token");

        let resp = self
            .http
            .post(creds.token_uri())
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| EngineError::CredentialError(format!("Token endpoint request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let sample: String = body.chars().take(BODY_SAMPLE_CHARS).collect();
            return Err(EngineError::CredentialError(format!(
                "Token endpoint returned {}: {sample}",
                status.as_u16()
            )));
        }

        let tr: TokenResponse = resp.json().await.map_err(|e| {
            EngineError::CredentialError(format!("Failed to parse token response: {e}"))
        })?;
        tracing::debug!(
            account = %creds.client_email,
            token = %mask_sensitive_value(&tr.access_token),
            expires_in = ?tr.expires_in,
            "access token minted"
        );
        Ok(tr.access_token)
    }
}

/// [`TokenProvider`] backed by a broker and one service account.
pub struct ServiceAccountTokenProvider {
    broker: Arc<CredentialBroker>,
    creds: ServiceAccountCredentials,
}

impl ServiceAccountTokenProvider {
    pub fn new(broker: Arc<CredentialBroker>, creds: ServiceAccountCredentials) -> Self {
        Self { broker, creds }
    }
}

#[async_trait]
impl TokenProvider for ServiceAccountTokenProvider {
    async fn token(&self) -> Result<String, EngineError> {
        self.broker.get_access_token(&self.creds).await
    }

    async fn refresh(&self) -> Result<String, EngineError> {
        self.broker.refresh_access_token(&self.creds).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryTokenCache;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds(server: &MockServer) -> ServiceAccountCredentials {
        ServiceAccountCredentials::new("svc@proj.iam.gserviceaccount.com", "unused")
            .with_token_uri(format!("{}/token", server.uri()))
    }

    #[tokio::test]
    async fn rejected_assertion_is_a_credential_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let broker = CredentialBroker::new(reqwest::Client::new(), Arc::new(InMemoryTokenCache::default()))
            .with_assertion_override("a.b.c");
        let err = broker.get_access_token(&creds(&server)).await.unwrap_err();
        match err {
            EngineError::CredentialError(msg) => {
                assert!(msg.contains("400"));
                assert!(msg.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stale_cache_entry_triggers_mint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("assertion=a.b.c"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh", "expires_in": 3600, "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(InMemoryTokenCache::default());
        let c = creds(&server);
        let stale = CachedToken {
            token: "old".into(),
            expires_at: chrono::Utc::now().timestamp() - 1,
        };
        cache
            .put(&c.cache_key(), serde_json::to_string(&stale).unwrap(), Duration::from_secs(60))
            .await
            .unwrap();

        let broker = CredentialBroker::new(reqwest::Client::new(), cache.clone())
            .with_assertion_override("a.b.c");
        assert_eq!(broker.get_access_token(&c).await.unwrap(), "fresh");

        let stored: CachedToken =
            serde_json::from_str(&cache.get(&c.cache_key()).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored.token, "fresh");
        let ttl = stored.expires_at - chrono::Utc::now().timestamp();
        assert!((3290..=3300).contains(&ttl));
    }

    #[tokio::test]
    async fn refresh_bypasses_a_valid_cache_entry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "reissued", "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = Arc::new(InMemoryTokenCache::default());
        let c = creds(&server);
        let cached = CachedToken {
            token: "rejected".into(),
            expires_at: chrono::Utc::now().timestamp() + 600,
        };
        cache
            .put(&c.cache_key(), serde_json::to_string(&cached).unwrap(), Duration::from_secs(600))
            .await
            .unwrap();

        let broker = CredentialBroker::new(reqwest::Client::new(), cache.clone())
            .with_assertion_override("a.b.c");
        assert_eq!(broker.get_access_token(&c).await.unwrap(), "rejected");
        assert_eq!(broker.refresh_access_token(&c).await.unwrap(), "reissued");
        assert_eq!(broker.get_access_token(&c).await.unwrap(), "reissued");
    }

    #[test]
    fn invalid_pem_fails_before_any_request() {
        let broker = CredentialBroker::new(reqwest::Client::new(), Arc::new(InMemoryTokenCache::default()));
        let c = ServiceAccountCredentials::new("svc@x", "not a pem");
        let err = broker.sign_assertion(&c, 0).unwrap_err();
        assert!(matches!(err, EngineError::CredentialError(_)));
    }
}
