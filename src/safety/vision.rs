//! Vision `images:annotate` SafeSearch client.
//!
//! Used as the separate safety step for providers that return no inline safety signal.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::SafeSearchAnnotation;
use crate::error::{EngineError, classify_http_error};
use crate::types::ImageRef;

pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    safe_search_annotation: Option<SafeSearchAnnotation>,
    error: Option<StatusBody>,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

pub struct SafeSearchClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: SecretString,
    timeout: Duration,
}

impl SafeSearchClient {
    pub fn new(http: reqwest::Client, api_key: SecretString) -> Self {
        Self {
            http,
            endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            api_key,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn image_json(image: &ImageRef) -> serde_json::Value {
        match image {
            ImageRef::Bytes { data, .. } => json!({ "content": STANDARD.encode(data) }),
            ImageRef::Url(url) => json!({ "source": { "imageUri": url } }),
        }
    }

    /// Annotate one image with `SAFE_SEARCH_DETECTION`.
    pub async fn annotate(&self, image: &ImageRef) -> Result<SafeSearchAnnotation, EngineError> {
        let body = json!({
            "requests": [{
                "image": Self::image_json(image),
                "features": [{ "type": "SAFE_SEARCH_DETECTION" }],
            }]
        });
        tracing::debug!(image = %image.describe(), "requesting SafeSearch annotation");

        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_http_error("vision", status.as_u16(), &text, &headers));
        }

        let parsed: AnnotateResponse = resp.json().await?;
        let first = parsed
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::ParseError("vision response has no entries".into()))?;
        if let Some(err) = first.error {
            return Err(EngineError::api_error(
                400,
                format!("vision annotate error {}: {}", err.code, err.message),
            ));
        }
        first.safe_search_annotation.ok_or_else(|| {
            EngineError::ParseError("vision response has no safeSearchAnnotation".into())
        })
    }
}
