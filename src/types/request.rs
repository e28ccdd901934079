use std::collections::HashMap;

use bytes::Bytes;

use crate::providers::ProviderId;
use crate::retry::RetryMode;

/// An image supplied by the caller: either bytes already in memory or a URL to fetch.
///
/// The engine only borrows these for the lifetime of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageRef {
    Bytes {
        data: Bytes,
        /// Optional declared MIME type; sniffed from the bytes when absent.
        mime_type: Option<String>,
    },
    Url(String),
}

impl ImageRef {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes {
            data: data.into(),
            mime_type: None,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn as_url(&self) -> Option<&str> {
        match self {
            Self::Url(u) => Some(u),
            Self::Bytes { .. } => None,
        }
    }

    /// Short description for logs; never includes image bytes.
    pub fn describe(&self) -> String {
        match self {
            Self::Url(u) => u.clone(),
            Self::Bytes { data, .. } => format!("<{} bytes>", data.len()),
        }
    }
}

/// One inbound generation request, immutable for the duration of a call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Face donor for swap providers; unused by single-image providers.
    pub source_image: Option<ImageRef>,
    /// Image being transformed.
    pub target_image: ImageRef,
    /// Explicit provider; the deployment default applies when absent.
    pub provider: Option<ProviderId>,
    /// A catalog ratio such as `"4:3"`, `"original"`, or absent.
    pub aspect_ratio_hint: Option<String>,
    pub prompt: String,
    /// Provider-specific passthrough parameters.
    pub extra_params: HashMap<String, serde_json::Value>,
    pub retry_mode: RetryMode,
}

impl GenerationRequest {
    pub fn builder(target_image: ImageRef) -> GenerationRequestBuilder {
        GenerationRequestBuilder::new(target_image)
    }

    /// String extra parameter, if present.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra_params.get(key).and_then(|v| v.as_str())
    }
}

/// Builder for [`GenerationRequest`].
#[derive(Debug, Clone)]
pub struct GenerationRequestBuilder {
    request: GenerationRequest,
}

impl GenerationRequestBuilder {
    pub fn new(target_image: ImageRef) -> Self {
        Self {
            request: GenerationRequest {
                source_image: None,
                target_image,
                provider: None,
                aspect_ratio_hint: None,
                prompt: String::new(),
                extra_params: HashMap::new(),
                retry_mode: RetryMode::Normal,
            },
        }
    }

    pub fn source_image(mut self, image: ImageRef) -> Self {
        self.request.source_image = Some(image);
        self
    }

    pub fn provider(mut self, provider: ProviderId) -> Self {
        self.request.provider = Some(provider);
        self
    }

    pub fn aspect_ratio(mut self, hint: impl Into<String>) -> Self {
        self.request.aspect_ratio_hint = Some(hint.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.request.prompt = prompt.into();
        self
    }

    pub fn extra_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.request.extra_params.insert(key.into(), value);
        self
    }

    pub fn retry_mode(mut self, mode: RetryMode) -> Self {
        self.request.retry_mode = mode;
        self
    }

    pub fn build(self) -> GenerationRequest {
        self.request
    }
}
