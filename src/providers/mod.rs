//! Upstream providers.
//!
//! The provider set is closed: [`ProviderId`] enumerates every upstream and
//! the orchestrator dispatches on it exhaustively. Each module shapes the
//! request for its upstream and reads the upstream's response back into a
//! [`ProviderOutput`].

pub mod http;
pub mod rapidapi;
pub mod vertex;
pub mod wavespeed;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::safety::SafetySignal;
use crate::types::ResultRef;

pub use http::{FormPart, PreparedRequest, RequestBody, UpstreamResponse};

/// WaveSpeed model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaveSpeedModel {
    FaceSwap,
    Enhance,
    Upscale,
}

/// Identifies one upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderId {
    /// RapidAPI face swap, multipart upload.
    RapidApiFaceSwap,
    /// Vertex Gemini image model via `generateContent`.
    VertexGeminiImage,
    /// Vertex Imagen `predict` in upscale mode.
    VertexImagenUpscale,
    /// WaveSpeed v3 task API.
    WaveSpeed(WaveSpeedModel),
}

impl ProviderId {
    pub const ALL: [ProviderId; 6] = [
        Self::RapidApiFaceSwap,
        Self::VertexGeminiImage,
        Self::VertexImagenUpscale,
        Self::WaveSpeed(WaveSpeedModel::FaceSwap),
        Self::WaveSpeed(WaveSpeedModel::Enhance),
        Self::WaveSpeed(WaveSpeedModel::Upscale),
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RapidApiFaceSwap => "rapidapi",
            Self::VertexGeminiImage => "vertex",
            Self::VertexImagenUpscale => "vertex-upscale",
            Self::WaveSpeed(WaveSpeedModel::FaceSwap) => "wavespeed-faceswap",
            Self::WaveSpeed(WaveSpeedModel::Enhance) => "wavespeed-enhance",
            Self::WaveSpeed(WaveSpeedModel::Upscale) => "wavespeed-upscale",
        }
    }

    pub const fn descriptor(self) -> ProviderDescriptor {
        match self {
            Self::RapidApiFaceSwap => ProviderDescriptor {
                id: self,
                display_name: "RapidAPI Face Swap",
                endpoint_template: "{base_url}/swap",
                auth: AuthScheme::RapidApiKey,
                encoding: RequestEncoding::Multipart,
                response: ResponseShape::ResultUrl,
                requires_source_image: true,
                accepts_aspect_ratio: false,
                inline_safety: false,
            },
            Self::VertexGeminiImage => ProviderDescriptor {
                id: self,
                display_name: "Vertex AI Gemini Image",
                endpoint_template: "{base_url}/models/{model}:generateContent",
                auth: AuthScheme::ServiceAccountBearer,
                encoding: RequestEncoding::Json,
                response: ResponseShape::GenerativeEnvelope,
                requires_source_image: false,
                accepts_aspect_ratio: true,
                inline_safety: true,
            },
            Self::VertexImagenUpscale => ProviderDescriptor {
                id: self,
                display_name: "Vertex AI Imagen Upscale",
                endpoint_template: "{base_url}/models/{model}:predict",
                auth: AuthScheme::ServiceAccountBearer,
                encoding: RequestEncoding::Json,
                response: ResponseShape::ImagenPredictions,
                requires_source_image: false,
                accepts_aspect_ratio: false,
                inline_safety: true,
            },
            Self::WaveSpeed(model) => ProviderDescriptor {
                id: self,
                display_name: match model {
                    WaveSpeedModel::FaceSwap => "WaveSpeed Face Swap",
                    WaveSpeedModel::Enhance => "WaveSpeed Enhance",
                    WaveSpeedModel::Upscale => "WaveSpeed Upscale",
                },
                endpoint_template: "{base_url}/{model}",
                auth: AuthScheme::ApiKeyBearer,
                encoding: RequestEncoding::Json,
                response: ResponseShape::AsyncTask,
                requires_source_image: matches!(model, WaveSpeedModel::FaceSwap),
                accepts_aspect_ratio: matches!(model, WaveSpeedModel::Enhance),
                inline_safety: false,
            },
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rapidapi" | "rapidapi-faceswap" => Ok(Self::RapidApiFaceSwap),
            "vertex" | "vertex-gemini" | "gemini" => Ok(Self::VertexGeminiImage),
            "vertex-upscale" | "imagen-upscale" => Ok(Self::VertexImagenUpscale),
            "wavespeed" | "wavespeed-faceswap" => Ok(Self::WaveSpeed(WaveSpeedModel::FaceSwap)),
            "wavespeed-enhance" => Ok(Self::WaveSpeed(WaveSpeedModel::Enhance)),
            "wavespeed-upscale" => Ok(Self::WaveSpeed(WaveSpeedModel::Upscale)),
            other => Err(EngineError::ConfigurationError(format!(
                "unknown provider '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for ProviderId {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ProviderId> for String {
    fn from(id: ProviderId) -> Self {
        id.as_str().to_string()
    }
}

/// How requests to a provider are authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `x-rapidapi-key` / `x-rapidapi-host` headers.
    RapidApiKey,
    /// Bearer token minted from a service account.
    ServiceAccountBearer,
    /// Static API key sent as a bearer token.
    ApiKeyBearer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestEncoding {
    Multipart,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// JSON carrying a result URL (or the image bytes themselves).
    ResultUrl,
    /// `candidates` / `promptFeedback` envelope.
    GenerativeEnvelope,
    /// Imagen `predictions` array.
    ImagenPredictions,
    /// Task id, result fetched by polling.
    AsyncTask,
}

/// Static description of one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub display_name: &'static str,
    pub endpoint_template: &'static str,
    pub auth: AuthScheme,
    pub encoding: RequestEncoding,
    pub response: ResponseShape,
    pub requires_source_image: bool,
    pub accepts_aspect_ratio: bool,
    /// Whether responses embed safety signals to normalise.
    pub inline_safety: bool,
}

/// What a provider call produced, before safety normalisation.
#[derive(Debug, Clone, Default)]
pub struct ProviderOutput {
    pub result_ref: Option<ResultRef>,
    pub safety_signal: Option<SafetySignal>,
    pub upstream_task_id: Option<String>,
    /// Answer text, for the prompt path.
    pub text: Option<String>,
}
