//! Byte fetching for image references.
//!
//! Image headers are fetched with a `Range` request when the image is a URL,
//! falling back to a full fetch when the upstream does not honour the range.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, RANGE};

use crate::error::{EngineError, classify_http_error};
use crate::types::ImageRef;
use crate::utils::mime::guess_mime;

/// Options for one fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub timeout: Option<Duration>,
    /// Inclusive byte range `(start, end)` to request.
    pub range: Option<(u64, u64)>,
}

impl FetchOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            range: None,
        }
    }

    pub fn with_range(mut self, start: u64, end: u64) -> Self {
        self.range = Some((start, end));
        self
    }
}

/// Bytes returned by a fetch.
#[derive(Debug, Clone)]
pub struct FetchedBytes {
    pub bytes: Bytes,
    pub content_type: Option<String>,
    /// True when the upstream answered `206 Partial Content`.
    pub partial: bool,
}

/// Capability to retrieve bytes behind a URL.
#[async_trait]
pub trait ByteFetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedBytes, EngineError>;
}

/// reqwest-backed fetcher.
#[derive(Debug, Clone)]
pub struct HttpByteFetcher {
    client: reqwest::Client,
}

impl HttpByteFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpByteFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl ByteFetcher for HttpByteFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchedBytes, EngineError> {
        let mut req = self.client.get(url);
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }
        if let Some((start, end)) = options.range {
            req = req.header(RANGE, format!("bytes={start}-{end}"));
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_http_error("fetch", status.as_u16(), &body, &headers));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await?;
        Ok(FetchedBytes {
            bytes,
            content_type,
            partial: status == StatusCode::PARTIAL_CONTENT,
        })
    }
}

/// Fully materialised image payload.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub bytes: Bytes,
    pub mime_type: String,
}

/// Load the complete image, resolving its MIME type from the declaration,
/// the response `Content-Type`, or the bytes themselves.
pub async fn load_image(
    fetcher: &dyn ByteFetcher,
    image: &ImageRef,
    timeout: Duration,
) -> Result<LoadedImage, EngineError> {
    let (bytes, declared, path) = match image {
        ImageRef::Bytes { data, mime_type } => (data.clone(), mime_type.clone(), None),
        ImageRef::Url(url) => {
            let fetched = fetcher
                .fetch(url, &FetchOptions::with_timeout(timeout))
                .await?;
            (fetched.bytes, fetched.content_type, Some(url.as_str()))
        }
    };
    if bytes.is_empty() {
        return Err(EngineError::InvalidInput(format!(
            "image {} is empty",
            image.describe()
        )));
    }
    let mime_type = declared
        .filter(|m| m.starts_with("image/"))
        .map(|m| m.split(';').next().unwrap_or(&m).trim().to_string())
        .unwrap_or_else(|| guess_mime(Some(&bytes), path));
    Ok(LoadedImage { bytes, mime_type })
}

/// Leading bytes of an image.
#[derive(Debug, Clone)]
pub struct ImageHeader {
    pub bytes: Bytes,
    /// False when `bytes` is a prefix cut by a range request.
    pub complete: bool,
}

/// Load the leading bytes of the image.
///
/// In-memory images are returned whole. For URLs a range request for
/// `header_len` bytes is tried first; any failure of the range request falls
/// back to a plain full fetch.
pub async fn load_image_header(
    fetcher: &dyn ByteFetcher,
    image: &ImageRef,
    header_len: usize,
    timeout: Duration,
) -> Result<ImageHeader, EngineError> {
    let url = match image {
        ImageRef::Bytes { data, .. } => {
            return Ok(ImageHeader {
                bytes: data.clone(),
                complete: true,
            });
        }
        ImageRef::Url(url) => url,
    };
    let end = header_len.saturating_sub(1) as u64;
    let ranged = FetchOptions::with_timeout(timeout).with_range(0, end);
    let fetched = match fetcher.fetch(url, &ranged).await {
        Ok(fetched) => fetched,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "range fetch failed, retrying with full fetch");
            fetcher
                .fetch(url, &FetchOptions::with_timeout(timeout))
                .await?
        }
    };
    // A short 206 already holds the whole file.
    let complete = !fetched.partial || fetched.bytes.len() < header_len;
    Ok(ImageHeader {
        bytes: fetched.bytes,
        complete,
    })
}
