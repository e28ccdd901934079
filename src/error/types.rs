use thiserror::Error;

/// Coarse grouping of errors, used for logging and result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller supplied something the upstream or the engine rejects.
    Client,
    /// Upstream 5xx or an upstream task that failed on its side.
    Server,
    /// Transport level problems (connect, TLS, reading the body).
    Network,
    Timeout,
    RateLimit,
    Authentication,
    /// Minting or exchanging a service-account credential failed.
    Credential,
    Configuration,
    Parsing,
    Cancelled,
    Internal,
}

/// Errors produced by the engine.
///
/// Every message is meant to be safe to log and to return to callers:
/// credential material is never formatted into a variant.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// Transport failure talking to an upstream.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The call exceeded its deadline.
    #[error("Timeout: {0}")]
    TimeoutError(String),

    /// Upstream answered with a non-success status.
    #[error("API error {code}: {message}")]
    ApiError {
        code: u16,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("Rate limited: {0}")]
    RateLimitError(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceededError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Signing the JWT assertion or exchanging it at the token endpoint failed.
    #[error("Credential error: {0}")]
    CredentialError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("JSON error: {0}")]
    JsonError(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// An asynchronous upstream task reported failure.
    #[error("Upstream task failed: {0}")]
    UpstreamTaskFailed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl EngineError {
    /// Create an `ApiError` without details.
    pub fn api_error(code: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create an `ApiError` carrying structured upstream details.
    pub fn api_error_with_details(
        code: u16,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self::ApiError {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    /// HTTP status implied by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { code, .. } => Some(*code),
            Self::RateLimitError(_) => Some(429),
            Self::AuthenticationError(_) => Some(401),
            Self::NotFound(_) => Some(404),
            Self::QuotaExceededError(_) => Some(403),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HttpError(_) => ErrorCategory::Network,
            Self::TimeoutError(_) => ErrorCategory::Timeout,
            Self::RateLimitError(_) => ErrorCategory::RateLimit,
            Self::AuthenticationError(_) => ErrorCategory::Authentication,
            Self::CredentialError(_) => ErrorCategory::Credential,
            Self::ConfigurationError(_) => ErrorCategory::Configuration,
            Self::ParseError(_) | Self::JsonError(_) => ErrorCategory::Parsing,
            Self::Cancelled(_) => ErrorCategory::Cancelled,
            Self::InternalError(_) => ErrorCategory::Internal,
            Self::UpstreamTaskFailed(_) => ErrorCategory::Server,
            Self::ApiError { code, .. } if *code >= 500 => ErrorCategory::Server,
            Self::ApiError { .. }
            | Self::QuotaExceededError(_)
            | Self::NotFound(_)
            | Self::InvalidInput(_)
            | Self::UnsupportedOperation(_) => ErrorCategory::Client,
        }
    }

    /// Stable machine-readable code surfaced in `GenerationResult.error.code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::HttpError(_) => "UPSTREAM_UNREACHABLE",
            Self::TimeoutError(_) => "UPSTREAM_TIMEOUT",
            Self::ApiError { code, .. } if *code >= 500 => "UPSTREAM_SERVER_ERROR",
            Self::ApiError { .. } => "UPSTREAM_REJECTED",
            Self::RateLimitError(_) => "RATE_LIMITED",
            Self::QuotaExceededError(_) => "QUOTA_EXCEEDED",
            Self::AuthenticationError(_) => "UPSTREAM_AUTH_FAILED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::CredentialError(_) => "CREDENTIAL_ERROR",
            Self::ConfigurationError(_) => "CONFIGURATION_ERROR",
            Self::ParseError(_) | Self::JsonError(_) => "INVALID_UPSTREAM_RESPONSE",
            Self::UnsupportedOperation(_) => "UNSUPPORTED",
            Self::UpstreamTaskFailed(_) => "UPSTREAM_TASK_FAILED",
            Self::Cancelled(_) => "CANCELLED",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the default retry policy would retry this error.
    pub fn is_retryable(&self) -> bool {
        crate::retry::RetryPolicy::default().should_retry(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_variants() {
        assert_eq!(EngineError::api_error(503, "down").status_code(), Some(503));
        assert_eq!(
            EngineError::RateLimitError("slow down".into()).status_code(),
            Some(429)
        );
        assert_eq!(EngineError::HttpError("reset".into()).status_code(), None);
        assert_eq!(
            EngineError::CredentialError("token endpoint returned 500".into()).status_code(),
            None
        );
    }

    #[test]
    fn categories_split_client_and_server_api_errors() {
        assert_eq!(
            EngineError::api_error(404, "nope").category(),
            ErrorCategory::Client
        );
        assert_eq!(
            EngineError::api_error(502, "bad gateway").category(),
            ErrorCategory::Server
        );
        assert_eq!(EngineError::api_error(502, "x").code(), "UPSTREAM_SERVER_ERROR");
    }
}
