//! Engine configuration.
//!
//! Built programmatically through [`EngineConfig::builder`] or read from the
//! process environment with [`EngineConfig::from_env`]. Every provider block
//! is optional; requesting a provider whose block is missing fails with a
//! configuration error at `SELECT_PROVIDER`.

use std::time::Duration;

use secrecy::SecretString;
use validator::{Validate, ValidationError};

use crate::auth::ServiceAccountCredentials;
use crate::error::EngineError;
use crate::image::{AspectRatioCatalog, DEFAULT_HEADER_BYTES};
use crate::providers::ProviderId;
use crate::safety::SafetyStrictness;
use crate::utils::vertex_base_url;

fn positive_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration"));
    }
    Ok(())
}

fn upscale_factor(value: &str) -> Result<(), ValidationError> {
    match value {
        "x2" | "x3" | "x4" => Ok(()),
        _ => Err(ValidationError::new("upscale_factor")),
    }
}

/// RapidAPI face swap.
#[derive(Debug, Clone, Validate)]
pub struct RapidApiConfig {
    pub api_key: SecretString,
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(url)]
    pub base_url: String,
    #[validate(custom(function = "positive_duration"))]
    pub timeout: Duration,
}

impl RapidApiConfig {
    pub const DEFAULT_HOST: &'static str = "face-swap1.p.rapidapi.com";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            host: Self::DEFAULT_HOST.to_string(),
            base_url: format!("https://{}", Self::DEFAULT_HOST),
            timeout: Duration::from_secs(60),
        }
    }

    /// Sets both the `x-rapidapi-host` header and the matching base URL.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self.base_url = format!("https://{}", self.host);
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Vertex AI (Gemini image model, Imagen upscale, prompt model).
#[derive(Debug, Clone, Validate)]
pub struct VertexConfig {
    #[validate(length(min = 1))]
    pub project_id: String,
    #[validate(length(min = 1))]
    pub location: String,
    #[validate(length(min = 1))]
    pub model: String,
    #[validate(length(min = 1))]
    pub upscale_model: String,
    #[validate(length(min = 1))]
    pub prompt_model: String,
    #[validate(custom(function = "upscale_factor"))]
    pub upscale_factor: String,
    /// Overrides the regional publisher URL.
    #[validate(url)]
    pub base_url: Option<String>,
    pub credentials: Option<ServiceAccountCredentials>,
    #[validate(custom(function = "positive_duration"))]
    pub timeout: Duration,
}

impl VertexConfig {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            location: "us-central1".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
            upscale_model: "imagen-4.0-upscale-preview".to_string(),
            prompt_model: "gemini-2.5-flash".to_string(),
            upscale_factor: "x2".to_string(),
            base_url: None,
            credentials: None,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_upscale_model(mut self, model: impl Into<String>) -> Self {
        self.upscale_model = model.into();
        self
    }

    pub fn with_prompt_model(mut self, model: impl Into<String>) -> Self {
        self.prompt_model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_credentials(mut self, credentials: ServiceAccountCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publisher base URL for model endpoints.
    pub fn endpoint_base(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| vertex_base_url(&self.project_id, &self.location, "google"))
    }
}

/// WaveSpeed v3 task API.
#[derive(Debug, Clone, Validate)]
pub struct WaveSpeedConfig {
    pub api_key: SecretString,
    #[validate(url)]
    pub base_url: String,
    #[validate(length(min = 1))]
    pub faceswap_model: String,
    #[validate(length(min = 1))]
    pub enhance_model: String,
    #[validate(length(min = 1))]
    pub upscale_model: String,
    pub poll_interval: Duration,
    #[validate(range(min = 1, max = 1000))]
    pub max_polls: u32,
    #[validate(custom(function = "positive_duration"))]
    pub timeout: Duration,
}

impl WaveSpeedConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.wavespeed.ai/api/v3";

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            faceswap_model: "wavespeed-ai/image-face-swap".to_string(),
            enhance_model: "google/nano-banana/edit".to_string(),
            upscale_model: "wavespeed-ai/image-upscaler".to_string(),
            poll_interval: Duration::from_secs(2),
            max_polls: 90,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }
}

/// Vision SafeSearch.
#[derive(Debug, Clone, Validate)]
pub struct VisionConfig {
    pub api_key: SecretString,
    #[validate(url)]
    pub endpoint: String,
    #[validate(custom(function = "positive_duration"))]
    pub timeout: Duration,
}

impl VisionConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::from(api_key.into()),
            endpoint: crate::safety::vision::DEFAULT_VISION_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Attempt caps for the two retried paths.
#[derive(Debug, Clone, Validate)]
pub struct RetrySettings {
    #[validate(range(min = 1, max = 50))]
    pub max_attempts: u32,
    #[validate(range(min = 1, max = 50))]
    pub prompt_max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            prompt_max_attempts: 15,
        }
    }
}

/// Aspect-ratio resolution settings.
#[derive(Debug, Clone, Validate)]
pub struct ImageSettings {
    /// Catalog used by providers that accept an aspect ratio.
    pub catalog: AspectRatioCatalog,
    pub allow_original: bool,
    #[validate(range(min = 24, max = 4194304))]
    pub header_bytes: usize,
    #[validate(custom(function = "positive_duration"))]
    pub fetch_timeout: Duration,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            catalog: AspectRatioCatalog::gemini_image(),
            allow_original: true,
            header_bytes: DEFAULT_HEADER_BYTES,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Validate)]
pub struct EngineConfig {
    pub default_provider: ProviderId,
    #[validate(nested)]
    pub rapidapi: Option<RapidApiConfig>,
    #[validate(nested)]
    pub vertex: Option<VertexConfig>,
    #[validate(nested)]
    pub wavespeed: Option<WaveSpeedConfig>,
    #[validate(nested)]
    pub vision: Option<VisionConfig>,
    #[validate(nested)]
    pub retry: RetrySettings,
    #[validate(nested)]
    pub image: ImageSettings,
    pub safety_strictness: SafetyStrictness,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_provider: ProviderId::RapidApiFaceSwap,
            rapidapi: None,
            vertex: None,
            wavespeed: None,
            vision: None,
            retry: RetrySettings::default(),
            image: ImageSettings::default(),
            safety_strictness: SafetyStrictness::default(),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let number = |key: &str| -> Result<Option<u32>, EngineError> {
            var(key)
                .map(|v| {
                    v.parse::<u32>().map_err(|e| {
                        EngineError::ConfigurationError(format!("{key} must be a positive integer: {e}"))
                    })
                })
                .transpose()
        };

        let mut builder = Self::builder();

        if let Some(p) = var("GENBRIDGE_DEFAULT_PROVIDER") {
            builder = builder.default_provider(p.parse()?);
        }

        if let Some(key) = var("RAPIDAPI_KEY") {
            let mut rapid = RapidApiConfig::new(key);
            if let Some(host) = var("RAPIDAPI_HOST") {
                rapid = rapid.with_host(host);
            }
            if let Some(url) = var("RAPIDAPI_BASE_URL") {
                rapid = rapid.with_base_url(url);
            }
            builder = builder.rapidapi(rapid);
        }

        let credentials = var("GOOGLE_SERVICE_ACCOUNT_JSON")
            .map(|json| ServiceAccountCredentials::from_json(&json))
            .transpose()?;
        let project = var("GOOGLE_VERTEX_PROJECT_ID")
            .or_else(|| credentials.as_ref().and_then(|c| c.project_id.clone()));
        if let Some(project) = project {
            let mut vertex = VertexConfig::new(project);
            if let Some(location) = var("GOOGLE_VERTEX_LOCATION") {
                vertex = vertex.with_location(location);
            }
            if let Some(model) = var("GOOGLE_VERTEX_MODEL") {
                vertex = vertex.with_model(model);
            }
            if let Some(model) = var("GOOGLE_VERTEX_UPSCALE_MODEL") {
                vertex = vertex.with_upscale_model(model);
            }
            if let Some(model) = var("GOOGLE_VERTEX_PROMPT_MODEL") {
                vertex = vertex.with_prompt_model(model);
            }
            if let Some(url) = var("GOOGLE_VERTEX_BASE_URL") {
                vertex = vertex.with_base_url(url);
            }
            if let Some(creds) = credentials {
                vertex = vertex.with_credentials(creds);
            }
            builder = builder.vertex(vertex);
        }

        if let Some(key) = var("WAVESPEED_API_KEY") {
            let mut ws = WaveSpeedConfig::new(key);
            if let Some(url) = var("WAVESPEED_BASE_URL") {
                ws = ws.with_base_url(url);
            }
            builder = builder.wavespeed(ws);
        }

        if let Some(key) = var("GOOGLE_VISION_API_KEY") {
            let mut vision = VisionConfig::new(key);
            if let Some(endpoint) = var("GOOGLE_VISION_ENDPOINT") {
                vision = vision.with_endpoint(endpoint);
            }
            builder = builder.vision(vision);
        }

        if let Some(n) = number("GENBRIDGE_MAX_ATTEMPTS")? {
            builder = builder.max_attempts(n);
        }
        if let Some(n) = number("GENBRIDGE_PROMPT_MAX_ATTEMPTS")? {
            builder = builder.prompt_max_attempts(n);
        }
        if let Some(s) = var("GENBRIDGE_SAFETY_STRICTNESS") {
            builder = builder.safety_strictness(s.parse()?);
        }

        builder.build()
    }

    /// Run all validation rules.
    pub fn validate_config(&self) -> Result<(), EngineError> {
        self.validate()?;
        Ok(())
    }
}

/// Builder for [`EngineConfig`]; `build` validates.
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn default_provider(mut self, provider: ProviderId) -> Self {
        self.config.default_provider = provider;
        self
    }

    pub fn rapidapi(mut self, config: RapidApiConfig) -> Self {
        self.config.rapidapi = Some(config);
        self
    }

    pub fn vertex(mut self, config: VertexConfig) -> Self {
        self.config.vertex = Some(config);
        self
    }

    pub fn wavespeed(mut self, config: WaveSpeedConfig) -> Self {
        self.config.wavespeed = Some(config);
        self
    }

    pub fn vision(mut self, config: VisionConfig) -> Self {
        self.config.vision = Some(config);
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn prompt_max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.prompt_max_attempts = attempts;
        self
    }

    pub fn safety_strictness(mut self, strictness: SafetyStrictness) -> Self {
        self.config.safety_strictness = strictness;
        self
    }

    pub fn aspect_ratio_catalog(mut self, catalog: AspectRatioCatalog) -> Self {
        self.config.image.catalog = catalog;
        self
    }

    pub fn allow_original(mut self, allow: bool) -> Self {
        self.config.image.allow_original = allow;
        self
    }

    pub fn build(self) -> Result<EngineConfig, EngineError> {
        self.config.validate_config()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let c = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(c.default_provider, ProviderId::RapidApiFaceSwap);
        assert!(c.rapidapi.is_none() && c.vertex.is_none());
        assert_eq!(c.retry.max_attempts, 3);
        assert_eq!(c.retry.prompt_max_attempts, 15);
    }

    #[test]
    fn reads_provider_blocks() {
        let c = EngineConfig::from_lookup(lookup(&[
            ("GENBRIDGE_DEFAULT_PROVIDER", "vertex"),
            ("RAPIDAPI_KEY", "rk"),
            ("RAPIDAPI_HOST", "swap.p.rapidapi.com"),
            ("GOOGLE_VERTEX_PROJECT_ID", "proj"),
            ("GOOGLE_VERTEX_LOCATION", "europe-west4"),
            ("WAVESPEED_API_KEY", "wk"),
            ("GENBRIDGE_SAFETY_STRICTNESS", "strict"),
            ("GENBRIDGE_MAX_ATTEMPTS", "5"),
        ]))
        .unwrap();
        assert_eq!(c.default_provider, ProviderId::VertexGeminiImage);
        assert_eq!(c.rapidapi.unwrap().base_url, "https://swap.p.rapidapi.com");
        let vertex = c.vertex.unwrap();
        assert_eq!(
            vertex.endpoint_base(),
            "https://europe-west4-aiplatform.googleapis.com/v1/projects/proj/locations/europe-west4/publishers/google"
        );
        assert!(c.wavespeed.is_some());
        assert_eq!(c.safety_strictness, SafetyStrictness::Strict);
        assert_eq!(c.retry.max_attempts, 5);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(EngineConfig::from_lookup(lookup(&[("GENBRIDGE_MAX_ATTEMPTS", "lots")])).is_err());
        assert!(EngineConfig::from_lookup(lookup(&[("GENBRIDGE_MAX_ATTEMPTS", "0")])).is_err());
        assert!(
            EngineConfig::from_lookup(lookup(&[("RAPIDAPI_KEY", "k"), ("RAPIDAPI_BASE_URL", "not a url")]))
                .is_err()
        );
        assert!(EngineConfig::from_lookup(lookup(&[("GENBRIDGE_DEFAULT_PROVIDER", "dalle")])).is_err());
    }
}
