//! Upstream HTTP failure classification.

use super::types::EngineError;
use reqwest::header::HeaderMap;

/// Headers that commonly carry a request/trace identifier.
const REQUEST_ID_HEADERS: &[&str] = &[
    "x-request-id",
    "x-response-id",
    "x-trace-id",
    "traceparent",
    "x-correlation-id",
    "x-goog-request-id",
    "x-rapidapi-request-id",
];

const BODY_SAMPLE_CHARS: usize = 200;

/// Extract `name=value` pairs for the request id headers present on a response.
pub(crate) fn request_ids(headers: &HeaderMap) -> Vec<String> {
    REQUEST_ID_HEADERS
        .iter()
        .filter_map(|k| {
            headers
                .get(*k)
                .and_then(|v| v.to_str().ok())
                .map(|v| format!("{k}={v}"))
        })
        .collect()
}

/// Classify an HTTP failure into a typed error.
///
/// Inspects the status code, response body and headers to pick a specific
/// variant (rate limit, quota, auth, ...) instead of a generic `ApiError`.
/// The body is sampled to keep logs and returned diagnostics bounded.
pub fn classify_http_error(
    provider_id: &str,
    status: u16,
    body_text: &str,
    headers: &HeaderMap,
) -> EngineError {
    let lower = body_text.to_lowercase();
    let ids = request_ids(headers);
    let ids_suffix = if ids.is_empty() {
        String::new()
    } else {
        format!(" ids=[{}]", ids.join(","))
    };
    let body_sample = body_text.chars().take(BODY_SAMPLE_CHARS).collect::<String>();

    if status == 429 {
        let retry_after = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        return EngineError::RateLimitError(format!(
            "provider={provider_id} http=429 retry_after={retry_after}{ids_suffix} body_sample={body_sample}"
        ));
    }

    if status == 401 {
        return EngineError::AuthenticationError(format!(
            "provider={provider_id} unauthorized{ids_suffix} body_sample={body_sample}"
        ));
    }

    if status == 404 {
        return EngineError::NotFound(format!(
            "provider={provider_id} http=404{ids_suffix} body_sample={body_sample}"
        ));
    }

    if status == 413 {
        return EngineError::InvalidInput(format!(
            "provider={provider_id} http=413 payload too large{ids_suffix} body_sample={body_sample}"
        ));
    }
    if status == 415 {
        return EngineError::InvalidInput(format!(
            "provider={provider_id} http=415 unsupported media type{ids_suffix} body_sample={body_sample}"
        ));
    }

    if status == 403 || status == 400 {
        let quota_like = lower.contains("quota") || lower.contains("exceed");
        let rate_like = lower.contains("rate limit")
            || lower.contains("ratelimit")
            || lower.contains("resource_exhausted")
            || lower.contains("rate_limit_exceeded");
        if quota_like {
            return EngineError::QuotaExceededError(format!(
                "provider={provider_id} quota exceeded{ids_suffix}"
            ));
        }
        if rate_like {
            return EngineError::RateLimitError(format!(
                "provider={provider_id} rate limited{ids_suffix}"
            ));
        }
    }

    if status == 403 {
        return EngineError::AuthenticationError(format!(
            "provider={provider_id} forbidden{ids_suffix} body_sample={body_sample}"
        ));
    }

    let message = if body_text.trim().is_empty() {
        format!("provider={provider_id} http={status}{ids_suffix}")
    } else {
        format!("provider={provider_id} http={status}{ids_suffix} body_sample={body_sample}")
    };
    let details = match serde_json::from_str::<serde_json::Value>(body_text) {
        Ok(json) => serde_json::json!({
            "status": status,
            "provider": provider_id,
            "response": json,
            "request_ids": ids,
        }),
        Err(_) => serde_json::json!({
            "status": status,
            "provider": provider_id,
            "raw": body_sample,
            "request_ids": ids,
        }),
    };
    EngineError::api_error_with_details(status, message, details)
}
