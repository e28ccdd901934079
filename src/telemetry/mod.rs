//! Tracing subscriber setup and log hygiene helpers.
//!
//! The engine only emits `tracing` events; installing a subscriber is the
//! host's choice. [`init_from_env`] is a convenience for binaries and tests:
//!
//! ```rust,ignore
//! let _guard = genbridge::telemetry::init_from_env()?;
//! ```

use std::path::PathBuf;
use std::time::Instant;

use reqwest::header::HeaderMap;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::EngineError;

pub const ENV_LOG_LEVEL: &str = "GENBRIDGE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "GENBRIDGE_LOG_FORMAT";
pub const ENV_LOG_FILE: &str = "GENBRIDGE_LOG_FILE";

/// Output format for tracing logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonCompact,
}

impl std::str::FromStr for OutputFormat {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "json-compact" => Ok(Self::JsonCompact),
            other => Err(EngineError::ConfigurationError(format!(
                "Invalid log format: {other}. Valid options: text, json, json-compact"
            ))),
        }
    }
}

/// Configuration for the tracing subscriber
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub log_level: tracing::Level,
    pub output_format: OutputFormat,
    /// When set, logs go to this file through a non-blocking writer instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            log_level: tracing::Level::INFO,
            output_format: OutputFormat::Text,
            log_file: None,
        }
    }
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    pub fn debug() -> Self {
        Self {
            log_level: tracing::Level::DEBUG,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct SubscriberConfigBuilder {
    log_level: Option<tracing::Level>,
    output_format: Option<OutputFormat>,
    log_file: Option<PathBuf>,
}

impl SubscriberConfigBuilder {
    pub fn log_level(mut self, level: tracing::Level) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Set the log level from a string
    pub fn log_level_str(mut self, level: &str) -> Result<Self, EngineError> {
        let level = match level.trim().to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            other => {
                return Err(EngineError::ConfigurationError(format!(
                    "Invalid log level: {other}. Valid options: trace, debug, info, warn, error"
                )));
            }
        };
        self.log_level = Some(level);
        Ok(self)
    }

    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }

    pub fn build(self) -> SubscriberConfig {
        SubscriberConfig {
            log_level: self.log_level.unwrap_or(tracing::Level::INFO),
            output_format: self.output_format.unwrap_or_default(),
            log_file: self.log_file,
        }
    }
}

fn file_writer(path: &std::path::Path) -> Result<(BoxMakeWriter, WorkerGuard), EngineError> {
    let file_name = path.file_name().ok_or_else(|| {
        EngineError::ConfigurationError(format!("log file path has no file name: {}", path.display()))
    })?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((BoxMakeWriter::new(writer), guard))
}

/// Install a global subscriber.
///
/// Returns the file writer guard when file logging is enabled; keep it alive
/// for the life of the process. An already-installed global subscriber is not
/// an error.
pub fn init_subscriber(config: SubscriberConfig) -> Result<Option<WorkerGuard>, EngineError> {
    let level = config.log_level.as_str().to_lowercase();
    let filter = format!("genbridge={level}");

    let (writer, guard, ansi) = match &config.log_file {
        Some(path) => {
            let (w, g) = file_writer(path)?;
            (w, Some(g), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), None, true),
    };

    let init_result = match config.output_format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .json()
            .try_init(),
        OutputFormat::JsonCompact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(true)
            .json()
            .flatten_event(true)
            .try_init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .try_init(),
    };

    match init_result {
        Ok(()) => Ok(guard),
        Err(e) if e.to_string().contains("global default trace dispatcher has already been set") => {
            Ok(None)
        }
        Err(e) => Err(EngineError::ConfigurationError(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

/// Initialize from `GENBRIDGE_LOG_LEVEL`, `GENBRIDGE_LOG_FORMAT` and `GENBRIDGE_LOG_FILE`.
pub fn init_from_env() -> Result<Option<WorkerGuard>, EngineError> {
    let mut builder = SubscriberConfig::builder();
    if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
        builder = builder.log_level_str(&level)?;
    }
    if let Ok(format) = std::env::var(ENV_LOG_FORMAT) {
        builder = builder.output_format(format.parse()?);
    }
    if let Ok(file_path) = std::env::var(ENV_LOG_FILE) {
        builder = builder.log_file(PathBuf::from(file_path));
    }
    init_subscriber(builder.build())
}

/// Mask a secret for logging, keeping a few characters at each end.
pub fn mask_sensitive_value(value: &str) -> String {
    fn ends(s: &str, head: usize, tail: usize) -> String {
        let chars: Vec<char> = s.chars().collect();
        let h: String = chars[..head].iter().collect();
        let t: String = chars[chars.len() - tail..].iter().collect();
        format!("{h}...{t}")
    }
    if let Some(token) = value.strip_prefix("Bearer ") {
        return if token.chars().count() > 8 {
            format!("Bearer {}", ends(token, 4, 4))
        } else {
            "Bearer ***".to_string()
        };
    }
    if value.chars().count() > 16 {
        ends(value, 6, 4)
    } else {
        "***".to_string()
    }
}

/// Render headers as JSON with credentials masked.
pub fn format_headers_for_logging(headers: &HeaderMap) -> String {
    let map: std::collections::BTreeMap<&str, String> = headers
        .iter()
        .map(|(k, v)| {
            let value = v.to_str().unwrap_or("<invalid>");
            let name = k.as_str();
            let masked = if name.contains("authorization") || name.contains("key") || name.contains("token") {
                mask_sensitive_value(value)
            } else {
                value.to_string()
            };
            (name, masked)
        })
        .collect();
    serde_json::to_string(&map).unwrap_or_else(|_| format!("{map:?}"))
}

/// Per-provider request tracing.
pub struct ProviderTracer {
    provider: String,
    request_id: String,
}

impl ProviderTracer {
    pub fn new(provider: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            request_id: request_id.into(),
        }
    }

    pub fn request_start(&self, attempt: u32, method: &str, url: &str) {
        tracing::debug!(provider = %self.provider, request_id = %self.request_id, attempt, method, url, "request started");
    }

    pub fn request_headers(&self, headers: &HeaderMap) {
        tracing::trace!(provider = %self.provider, request_id = %self.request_id, headers = %format_headers_for_logging(headers), "request headers");
    }

    pub fn response_success(&self, attempt: u32, status: u16, started: Instant) {
        tracing::debug!(
            provider = %self.provider,
            request_id = %self.request_id,
            attempt,
            status,
            duration_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );
    }

    pub fn request_error(&self, attempt: u32, status: Option<u16>, error: &EngineError, started: Instant) {
        tracing::warn!(
            provider = %self.provider,
            request_id = %self.request_id,
            attempt,
            status = ?status,
            error = %error,
            duration_ms = started.elapsed().as_millis() as u64,
            "request failed"
        );
    }
}
