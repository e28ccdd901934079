mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use genbridge::auth::{
    CachedToken, CredentialBroker, InMemoryTokenCache, ServiceAccountCredentials, TokenCache,
};
use genbridge::error::EngineError;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn creds(server: &MockServer) -> ServiceAccountCredentials {
    ServiceAccountCredentials::new(support::TEST_CLIENT_EMAIL, support::TEST_RSA_PRIVATE_KEY)
        .with_token_uri(format!("{}/token", server.uri()))
}

fn token_endpoint(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "access_token": token,
        "token_type": "Bearer",
        "expires_in": 3599
    }))
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[tokio::test]
async fn fresh_cache_entry_is_served_without_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(token_endpoint("never"))
        .expect(0)
        .mount(&server)
        .await;

    let creds = creds(&server);
    let cache = Arc::new(InMemoryTokenCache::default());
    let cached = CachedToken {
        token: "ya29.cached".into(),
        expires_at: now() + 600,
    };
    cache
        .put(
            &creds.cache_key(),
            serde_json::to_string(&cached).unwrap(),
            Duration::from_secs(600),
        )
        .await
        .unwrap();

    let broker = CredentialBroker::new(reqwest::Client::new(), cache);
    assert_eq!(broker.get_access_token(&creds).await.unwrap(), "ya29.cached");
}

#[tokio::test]
async fn empty_cache_mints_exactly_one_signed_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string_contains(
            "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
        ))
        .respond_with(token_endpoint("ya29.minted"))
        .expect(1)
        .mount(&server)
        .await;

    let creds = creds(&server);
    let cache = Arc::new(InMemoryTokenCache::default());
    let broker = CredentialBroker::new(reqwest::Client::new(), cache.clone());

    assert_eq!(broker.get_access_token(&creds).await.unwrap(), "ya29.minted");
    assert_eq!(broker.get_access_token(&creds).await.unwrap(), "ya29.minted");

    let stored: CachedToken =
        serde_json::from_str(&cache.get(&creds.cache_key()).await.unwrap().unwrap()).unwrap();
    let ttl = stored.expires_at - now();
    assert!((3290..=3300).contains(&ttl), "ttl {ttl}");

    let requests = server.received_requests().await.unwrap();
    let body = String::from_utf8(requests[0].body.clone()).unwrap();
    let assertion = body
        .split('&')
        .find_map(|kv| kv.strip_prefix("assertion="))
        .unwrap();
    let segments: Vec<&str> = assertion.split('.').collect();
    assert_eq!(segments.len(), 3);

    let header: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[0]).unwrap()).unwrap();
    assert_eq!(header["alg"], "RS256");
    assert_eq!(header["typ"], "JWT");

    let claims: serde_json::Value =
        serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[1]).unwrap()).unwrap();
    assert_eq!(claims["iss"], support::TEST_CLIENT_EMAIL);
    assert_eq!(claims["sub"], support::TEST_CLIENT_EMAIL);
    assert_eq!(claims["aud"], format!("{}/token", server.uri()));
    assert_eq!(claims["scope"], "https://www.googleapis.com/auth/cloud-platform");
    assert_eq!(
        claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(),
        3600
    );
}

#[tokio::test]
async fn stale_entry_is_replaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(token_endpoint("ya29.new"))
        .expect(1)
        .mount(&server)
        .await;

    let creds = creds(&server);
    let cache = Arc::new(InMemoryTokenCache::default());
    let stale = CachedToken {
        token: "ya29.old".into(),
        expires_at: now() - 5,
    };
    cache
        .put(&creds.cache_key(), serde_json::to_string(&stale).unwrap(), Duration::from_secs(60))
        .await
        .unwrap();

    let broker = CredentialBroker::new(reqwest::Client::new(), cache);
    assert_eq!(broker.get_access_token(&creds).await.unwrap(), "ya29.new");
}

#[tokio::test]
async fn malformed_key_fails_without_calling_the_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(token_endpoint("never"))
        .expect(0)
        .mount(&server)
        .await;

    let creds = ServiceAccountCredentials::new(support::TEST_CLIENT_EMAIL, "not a pem")
        .with_token_uri(format!("{}/token", server.uri()));
    let broker = CredentialBroker::new(reqwest::Client::new(), Arc::new(InMemoryTokenCache::default()));
    let err = broker.get_access_token(&creds).await.unwrap_err();
    assert!(matches!(err, EngineError::CredentialError(_)));
    assert!(!err.to_string().contains("not a pem"));
}

/// A cache whose backend is down.
struct BrokenCache;

#[async_trait]
impl TokenCache for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, EngineError> {
        Err(EngineError::HttpError("kv unreachable".into()))
    }

    async fn put(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), EngineError> {
        Err(EngineError::HttpError("kv unreachable".into()))
    }
}

#[tokio::test]
async fn cache_outage_does_not_block_minting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(token_endpoint("ya29.direct"))
        .expect(2)
        .mount(&server)
        .await;

    let broker = CredentialBroker::new(reqwest::Client::new(), Arc::new(BrokenCache));
    let creds = creds(&server);
    assert_eq!(broker.get_access_token(&creds).await.unwrap(), "ya29.direct");
    assert_eq!(broker.get_access_token(&creds).await.unwrap(), "ya29.direct");
}
