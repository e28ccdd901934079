//! Provider orchestration.
//!
//! [`ProviderOrchestrator`] drives one request through
//! `SELECT_PROVIDER → BUILD_REQUEST → (ACQUIRE_CREDENTIAL)? → INVOKE →
//! (RETRY_WAIT → INVOKE)* → NORMALIZE_SAFETY → DONE | FAILED` and always
//! returns a unified result. Failures never escape as `Err`; they end in
//! `FAILED` with the classified error and the attempt log.
//!
//! Requests share nothing mutable except the credential cache, so one
//! orchestrator can serve any number of concurrent calls.

mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::{
    CredentialBroker, InMemoryTokenCache, ServiceAccountTokenProvider, TokenCache, TokenProvider,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fetch::{ByteFetcher, HttpByteFetcher, LoadedImage, load_image};
use crate::image::{AspectRatioResolver, ResolveOptions};
use crate::providers::http::{UpstreamResponse, send};
use crate::providers::rapidapi::RapidApiProvider;
use crate::providers::vertex::VertexProvider;
use crate::providers::wavespeed::WaveSpeedProvider;
use crate::providers::{AuthScheme, PreparedRequest, ProviderId, ProviderOutput};
use crate::retry::{RetryExecutor, RetryMode, RetryPolicy};
use crate::safety::{SafeSearchClient, SafetyNormalizer, SafetySignal, SafetyVerdict};
use crate::telemetry::ProviderTracer;
use crate::types::{
    ErrorBody, GenerationRequest, GenerationResult, ImageRef, PromptResult, TerminalState,
};

pub use state::State;
use state::RunTrace;

/// `error.code` of a result whose content was blocked.
pub const SAFETY_BLOCKED: &str = "SAFETY_BLOCKED";

async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled("request cancelled".to_string())),
        r = fut => r,
    }
}

fn blocked_error(verdict: &SafetyVerdict) -> ErrorBody {
    ErrorBody {
        code: SAFETY_BLOCKED.to_string(),
        message: verdict
            .reason
            .clone()
            .unwrap_or_else(|| "content blocked by safety filters".to_string()),
    }
}

/// Builder for [`ProviderOrchestrator`].
pub struct ProviderOrchestratorBuilder {
    config: EngineConfig,
    http: Option<reqwest::Client>,
    fetcher: Option<Arc<dyn ByteFetcher>>,
    token_cache: Option<Arc<dyn TokenCache>>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    normalizer: Option<SafetyNormalizer>,
    retry_delays: Option<(Duration, Duration)>,
}

impl ProviderOrchestratorBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            http: None,
            fetcher: None,
            token_cache: None,
            token_provider: None,
            normalizer: None,
            retry_delays: None,
        }
    }

    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ByteFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Cache backing the service-account broker. Ignored when a token
    /// provider is supplied directly.
    pub fn token_cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
        self.token_cache = Some(cache);
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn safety_normalizer(mut self, normalizer: SafetyNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Replace the base/max delay pair of both retry modes.
    pub fn retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry_delays = Some((base, max));
        self
    }

    pub fn build(self) -> Result<ProviderOrchestrator, EngineError> {
        let Self {
            config,
            http,
            fetcher,
            token_cache,
            token_provider,
            normalizer,
            retry_delays,
        } = self;
        config.validate_config()?;

        let http = http.unwrap_or_default();
        let fetcher = fetcher.unwrap_or_else(|| Arc::new(HttpByteFetcher::new(http.clone())));
        let token_provider = token_provider.or_else(|| {
            let vertex = config.vertex.as_ref()?;
            let creds = vertex.credentials.clone()?;
            let cache = token_cache.unwrap_or_else(|| Arc::new(InMemoryTokenCache::default()));
            let broker = CredentialBroker::new(http.clone(), cache).with_timeout(vertex.timeout);
            Some(Arc::new(ServiceAccountTokenProvider::new(Arc::new(broker), creds))
                as Arc<dyn TokenProvider>)
        });
        let vision = config.vision.as_ref().map(|v| {
            SafeSearchClient::new(http.clone(), v.api_key.clone())
                .with_endpoint(v.endpoint.clone())
                .with_timeout(v.timeout)
        });

        Ok(ProviderOrchestrator {
            rapidapi: config.rapidapi.clone().map(RapidApiProvider::new),
            vertex: config.vertex.clone().map(VertexProvider::new),
            wavespeed: config.wavespeed.clone().map(WaveSpeedProvider::new),
            normalizer: normalizer
                .unwrap_or_else(|| SafetyNormalizer::new(config.safety_strictness)),
            resolver: AspectRatioResolver::new(fetcher.clone()),
            config,
            http,
            fetcher,
            token_provider,
            vision,
            retry_delays,
        })
    }
}

/// Entry point for image generation calls.
pub struct ProviderOrchestrator {
    config: EngineConfig,
    http: reqwest::Client,
    fetcher: Arc<dyn ByteFetcher>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    normalizer: SafetyNormalizer,
    resolver: AspectRatioResolver,
    rapidapi: Option<RapidApiProvider>,
    vertex: Option<VertexProvider>,
    wavespeed: Option<WaveSpeedProvider>,
    vision: Option<SafeSearchClient>,
    retry_delays: Option<(Duration, Duration)>,
}

static_assertions::assert_impl_all!(ProviderOrchestrator: Send, Sync);

impl ProviderOrchestrator {
    /// Orchestrator with a default HTTP client, fetcher and in-memory token cache.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        ProviderOrchestratorBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> ProviderOrchestratorBuilder {
        ProviderOrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one generation request to a terminal state.
    pub async fn generate(&self, request: GenerationRequest) -> GenerationResult {
        self.generate_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`generate`](Self::generate), ending in `FAILED`/`CANCELLED` once
    /// `cancel` fires.
    pub async fn generate_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> GenerationResult {
        let provider = request.provider.unwrap_or(self.config.default_provider);
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("generate", request_id = %request_id, provider = %provider);

        async move {
            let mut trace = RunTrace::new(provider, request_id);
            match self.run_generate(&request, provider, &mut trace, &cancel).await {
                Ok((_, Some(verdict))) if !verdict.is_safe => {
                    tracing::warn!(code = ?verdict.code, category = ?verdict.category, "output blocked by safety filters");
                    trace.enter(State::Done);
                    GenerationResult {
                        success: false,
                        result_ref: None,
                        error: Some(blocked_error(&verdict)),
                        safety: Some(verdict),
                        provider_diagnostics: trace.finish(TerminalState::Done),
                    }
                }
                Ok((ProviderOutput { result_ref: Some(result_ref), .. }, safety)) => {
                    trace.enter(State::Done);
                    GenerationResult {
                        success: true,
                        result_ref: Some(result_ref),
                        safety,
                        provider_diagnostics: trace.finish(TerminalState::Done),
                        error: None,
                    }
                }
                Ok((_, safety)) => {
                    let err = EngineError::ParseError(format!(
                        "provider={provider} response carried no image"
                    ));
                    Self::failed(trace, &err, safety)
                }
                Err(err) => Self::failed(trace, &err, None),
            }
        }
        .instrument(span)
        .await
    }

    fn failed(
        trace: RunTrace,
        err: &EngineError,
        safety: Option<SafetyVerdict>,
    ) -> GenerationResult {
        trace.enter(State::Failed);
        tracing::error!(code = err.code(), error = %err, attempts = trace.attempts.len(), "request failed");
        GenerationResult {
            success: false,
            result_ref: None,
            safety,
            provider_diagnostics: trace.finish(TerminalState::Failed),
            error: Some(ErrorBody::from(err)),
        }
    }

    async fn run_generate(
        &self,
        request: &GenerationRequest,
        provider: ProviderId,
        trace: &mut RunTrace,
        cancel: &CancellationToken,
    ) -> Result<(ProviderOutput, Option<SafetyVerdict>), EngineError> {
        trace.enter(State::SelectProvider);
        let descriptor = provider.descriptor();
        self.ensure_configured(provider)?;
        if descriptor.requires_source_image && request.source_image.is_none() {
            return Err(EngineError::InvalidInput(format!(
                "provider {provider} needs a source image"
            )));
        }

        if descriptor.accepts_aspect_ratio {
            let options = self.resolve_options();
            let ratio = cancellable(cancel, async {
                Ok(self
                    .resolver
                    .resolve(
                        request.aspect_ratio_hint.as_deref(),
                        &request.target_image,
                        &self.config.image.catalog,
                        &options,
                    )
                    .await)
            })
            .await?;
            tracing::debug!(aspect_ratio = %ratio, "aspect ratio resolved");
            trace.aspect_ratio = Some(ratio);
        }

        trace.enter(State::BuildRequest);
        let prepared = cancellable(
            cancel,
            self.build_request(provider, request, trace.aspect_ratio.as_deref()),
        )
        .await?;
        trace.endpoint = prepared.url.clone();

        if descriptor.auth == AuthScheme::ServiceAccountBearer {
            // Surfaces credential failures before INVOKE; every attempt reads
            // the token again so a long retry loop never sends an expired one.
            trace.enter(State::AcquireCredential);
            cancellable(cancel, self.bearer_token()).await?;
        }

        trace.enter(State::Invoke);
        let tracer = ProviderTracer::new(provider.as_str(), trace.request_id());
        let executor = RetryExecutor::new(
            self.retry_policy(request.retry_mode, self.config.retry.max_attempts),
        )
        .with_cancellation(cancel.clone());
        let outcome = executor
            .execute(|attempt| self.invoke(provider, &prepared, &tracer, attempt))
            .await;
        trace.attempts = outcome.attempts;
        let output = outcome.result?;
        trace.upstream_task_id = output.upstream_task_id.clone();

        let verdict = if descriptor.inline_safety {
            trace.enter(State::NormalizeSafety);
            Some(self.normalize(output.safety_signal.as_ref()))
        } else {
            None
        };
        Ok((output, verdict))
    }

    /// Describe an image as a text prompt with the Vertex text model.
    pub async fn generate_prompt(&self, image: &ImageRef, instruction: Option<&str>) -> PromptResult {
        self.generate_prompt_with_cancel(image, instruction, CancellationToken::new())
            .await
    }

    pub async fn generate_prompt_with_cancel(
        &self,
        image: &ImageRef,
        instruction: Option<&str>,
        cancel: CancellationToken,
    ) -> PromptResult {
        let provider = ProviderId::VertexGeminiImage;
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("generate_prompt", request_id = %request_id, provider = %provider);

        async move {
            let mut trace = RunTrace::new(provider, request_id);
            let (error, prompt, safety, state) =
                match self.run_prompt(image, instruction, &mut trace, &cancel).await {
                    Ok((_, verdict)) if !verdict.is_safe => {
                        (Some(blocked_error(&verdict)), None, Some(verdict), TerminalState::Done)
                    }
                    Ok((Some(text), verdict)) => (None, Some(text), Some(verdict), TerminalState::Done),
                    Ok((None, verdict)) => {
                        let err = EngineError::ParseError(
                            "prompt model returned no text".to_string(),
                        );
                        (Some(ErrorBody::from(&err)), None, Some(verdict), TerminalState::Failed)
                    }
                    Err(err) => (Some(ErrorBody::from(&err)), None, None, TerminalState::Failed),
                };
            match state {
                TerminalState::Done => trace.enter(State::Done),
                TerminalState::Failed => {
                    trace.enter(State::Failed);
                    if let Some(e) = &error {
                        tracing::error!(code = %e.code, error = %e.message, "prompt generation failed");
                    }
                }
            }
            PromptResult {
                success: prompt.is_some(),
                prompt,
                safety,
                provider_diagnostics: trace.finish(state),
                error,
            }
        }
        .instrument(span)
        .await
    }

    async fn run_prompt(
        &self,
        image: &ImageRef,
        instruction: Option<&str>,
        trace: &mut RunTrace,
        cancel: &CancellationToken,
    ) -> Result<(Option<String>, SafetyVerdict), EngineError> {
        trace.enter(State::SelectProvider);
        let vertex = self.vertex()?;

        trace.enter(State::BuildRequest);
        let loaded = cancellable(cancel, self.load(image)).await?;
        let prepared = vertex.build_prompt(&loaded, instruction);
        trace.endpoint = prepared.url.clone();

        trace.enter(State::AcquireCredential);
        cancellable(cancel, self.bearer_token()).await?;

        trace.enter(State::Invoke);
        let tracer = ProviderTracer::new("vertex-prompt", trace.request_id());
        let executor = RetryExecutor::new(
            self.retry_policy(RetryMode::Normal, self.config.retry.prompt_max_attempts),
        )
        .with_cancellation(cancel.clone());
        let (prepared, tracer) = (&prepared, &tracer);
        let outcome = executor
            .execute(|attempt| async move {
                let resp = self.send_authorized(prepared, tracer, "vertex", attempt).await?;
                vertex.parse_prompt(&resp)
            })
            .await;
        trace.attempts = outcome.attempts;
        let output = outcome.result?;

        trace.enter(State::NormalizeSafety);
        let verdict = self.normalize(output.safety_signal.as_ref());
        let text = output.text.filter(|t| !t.trim().is_empty());
        Ok((text, verdict))
    }

    /// Standalone SafeSearch check, for providers that return no safety signal.
    pub async fn check_image_safety(&self, image: &ImageRef) -> Result<SafetyVerdict, EngineError> {
        let client = self.vision.as_ref().ok_or_else(|| {
            EngineError::ConfigurationError("vision safe search is not configured".to_string())
        })?;
        let span = tracing::info_span!("check_image_safety", image = %image.describe());
        async {
            let executor = RetryExecutor::new(
                self.retry_policy(RetryMode::Fast, self.config.retry.max_attempts),
            );
            let outcome = executor.execute(|_| client.annotate(image)).await;
            let annotation = outcome.result?;
            let verdict = self.normalizer.normalize(&SafetySignal::SafeSearch(annotation));
            tracing::debug!(is_safe = verdict.is_safe, code = ?verdict.code, "safe search verdict");
            Ok(verdict)
        }
        .instrument(span)
        .await
    }

    fn normalize(&self, signal: Option<&SafetySignal>) -> SafetyVerdict {
        signal.map_or_else(SafetyVerdict::safe, |s| self.normalizer.normalize(s))
    }

    fn retry_policy(&self, mode: RetryMode, max_attempts: u32) -> RetryPolicy {
        let policy = RetryPolicy::for_mode(mode, max_attempts);
        match self.retry_delays {
            Some((base, max)) => policy.with_base_delay(base).with_max_delay(max),
            None => policy,
        }
    }

    fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            allow_original: self.config.image.allow_original,
            header_bytes: self.config.image.header_bytes,
            fetch_timeout: self.config.image.fetch_timeout,
        }
    }

    fn ensure_configured(&self, provider: ProviderId) -> Result<(), EngineError> {
        match provider {
            ProviderId::RapidApiFaceSwap => self.rapidapi().map(|_| ()),
            ProviderId::VertexGeminiImage | ProviderId::VertexImagenUpscale => {
                self.vertex().map(|_| ())
            }
            ProviderId::WaveSpeed(_) => self.wavespeed().map(|_| ()),
        }
    }

    fn rapidapi(&self) -> Result<&RapidApiProvider, EngineError> {
        self.rapidapi.as_ref().ok_or_else(|| {
            EngineError::ConfigurationError("rapidapi provider is not configured".to_string())
        })
    }

    fn vertex(&self) -> Result<&VertexProvider, EngineError> {
        self.vertex.as_ref().ok_or_else(|| {
            EngineError::ConfigurationError("vertex provider is not configured".to_string())
        })
    }

    fn wavespeed(&self) -> Result<&WaveSpeedProvider, EngineError> {
        self.wavespeed.as_ref().ok_or_else(|| {
            EngineError::ConfigurationError("wavespeed provider is not configured".to_string())
        })
    }

    async fn load(&self, image: &ImageRef) -> Result<LoadedImage, EngineError> {
        load_image(self.fetcher.as_ref(), image, self.config.image.fetch_timeout).await
    }

    async fn bearer_token(&self) -> Result<String, EngineError> {
        let provider = self.token_provider.as_ref().ok_or_else(|| {
            EngineError::CredentialError(
                "no service account credentials configured for vertex".to_string(),
            )
        })?;
        provider.token().await
    }

    /// Send with the current bearer token. A rejected token is refreshed once
    /// and the call repeated within the same attempt.
    async fn send_authorized(
        &self,
        prepared: &PreparedRequest,
        tracer: &ProviderTracer,
        provider: &str,
        attempt: u32,
    ) -> Result<UpstreamResponse, EngineError> {
        let token = self.bearer_token().await?;
        let authorized = prepared.clone().bearer(&token)?;
        match send(&self.http, &authorized, tracer, provider, attempt).await {
            Err(EngineError::AuthenticationError(reason)) => {
                tracing::warn!(attempt, reason = %reason, "access token rejected, refreshing");
                let token = match &self.token_provider {
                    Some(p) => p.refresh().await?,
                    None => return Err(EngineError::AuthenticationError(reason)),
                };
                let authorized = prepared.clone().bearer(&token)?;
                send(&self.http, &authorized, tracer, provider, attempt).await
            }
            other => other,
        }
    }

    async fn build_request(
        &self,
        provider: ProviderId,
        request: &GenerationRequest,
        aspect_ratio: Option<&str>,
    ) -> Result<PreparedRequest, EngineError> {
        match provider {
            ProviderId::RapidApiFaceSwap => self.rapidapi()?.build_request(request),
            ProviderId::VertexGeminiImage => {
                let vertex = self.vertex()?;
                let target = self.load(&request.target_image).await?;
                let source = match &request.source_image {
                    Some(image) => Some(self.load(image).await?),
                    None => None,
                };
                Ok(vertex.build_generate(
                    &request.prompt,
                    &target,
                    source.as_ref(),
                    aspect_ratio,
                    &request.extra_params,
                ))
            }
            ProviderId::VertexImagenUpscale => {
                let vertex = self.vertex()?;
                let target = self.load(&request.target_image).await?;
                Ok(vertex.build_upscale(&target, &request.extra_params))
            }
            ProviderId::WaveSpeed(model) => {
                self.wavespeed()?.build_request(model, request, aspect_ratio)
            }
        }
    }

    async fn invoke(
        &self,
        provider: ProviderId,
        prepared: &PreparedRequest,
        tracer: &ProviderTracer,
        attempt: u32,
    ) -> Result<ProviderOutput, EngineError> {
        let resp = if provider.descriptor().auth == AuthScheme::ServiceAccountBearer {
            self.send_authorized(prepared, tracer, provider.as_str(), attempt)
                .await?
        } else {
            send(&self.http, prepared, tracer, provider.as_str(), attempt).await?
        };
        match provider {
            ProviderId::RapidApiFaceSwap => self.rapidapi()?.parse_response(&resp),
            ProviderId::VertexGeminiImage => self.vertex()?.parse_generate(&resp),
            ProviderId::VertexImagenUpscale => self.vertex()?.parse_upscale(&resp),
            ProviderId::WaveSpeed(_) => {
                self.wavespeed()?
                    .await_result(&self.http, tracer, &resp, attempt)
                    .await
            }
        }
    }
}
