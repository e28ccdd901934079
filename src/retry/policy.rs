use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Upper bound of the uniform jitter, as a fraction of the base delay.
pub const JITTER_RATIO: f64 = 0.3;

/// Phrases that mark an error as transient even without a status code.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "time out",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "rate_limit",
    "too many requests",
];

/// Delay pair selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// 500 ms base, 5 s cap.
    Fast,
    /// 2 s base, 30 s cap.
    #[default]
    Normal,
}

impl RetryMode {
    pub const fn base_delay(self) -> Duration {
        match self {
            Self::Fast => Duration::from_millis(500),
            Self::Normal => Duration::from_millis(2000),
        }
    }

    pub const fn max_delay(self) -> Duration {
        match self {
            Self::Fast => Duration::from_millis(5000),
            Self::Normal => Duration::from_millis(30_000),
        }
    }
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub delay_ms: u64,
}

/// `min(max, base * 2^attempt) + U[0, 0.3 * base]`, in milliseconds.
pub fn backoff_delay(attempt_index: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    jittered(attempt_index, base_delay_ms, max_delay_ms, JITTER_RATIO)
}

fn jittered(attempt_index: u32, base_ms: u64, max_ms: u64, ratio: f64) -> u64 {
    let exponential = base_ms
        .saturating_mul(2u64.saturating_pow(attempt_index))
        .min(max_ms);
    let jitter_cap = (base_ms as f64 * ratio.max(0.0)) as u64;
    let jitter = if jitter_cap == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=jitter_cap)
    };
    exponential.saturating_add(jitter)
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::for_mode(RetryMode::Normal, 3)
    }
}

impl RetryPolicy {
    pub fn for_mode(mode: RetryMode, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: mode.base_delay(),
            max_delay: mode.max_delay(),
        }
    }

    pub fn fast() -> Self {
        Self::for_mode(RetryMode::Fast, 3)
    }

    pub fn normal() -> Self {
        Self::for_mode(RetryMode::Normal, 3)
    }

    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Whether `error` is transient.
    ///
    /// An explicit `http_status` takes precedence over the status implied by
    /// the error variant. 4xx other than 429 is fatal; 429 and 5xx are
    /// retryable. Without a status, timeouts are retryable and anything else
    /// is retried only when its text mentions a timeout or rate limit.
    pub fn classify(error: &EngineError, http_status: Option<u16>) -> bool {
        if let Some(status) = http_status.or_else(|| error.status_code()) {
            if status == 429 || status >= 500 {
                return true;
            }
            if (400..500).contains(&status) {
                return false;
            }
        }
        match error {
            EngineError::TimeoutError(_) | EngineError::RateLimitError(_) => true,
            EngineError::CredentialError(_)
            | EngineError::ConfigurationError(_)
            | EngineError::InvalidInput(_)
            | EngineError::UnsupportedOperation(_)
            | EngineError::Cancelled(_) => false,
            other => mentions_transient(&other.to_string()),
        }
    }

    pub fn should_retry(&self, error: &EngineError) -> bool {
        Self::classify(error, None)
    }

    /// Jittered delay before retry number `attempt_index + 1`.
    pub fn calculate_delay(&self, attempt_index: u32) -> Duration {
        Duration::from_millis(jittered(
            attempt_index,
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
            JITTER_RATIO,
        ))
    }

    /// Decide after the 0-based attempt `attempt_index` failed with `error`.
    pub fn decide(&self, error: &EngineError, attempt_index: u32) -> RetryDecision {
        let has_budget = attempt_index.saturating_add(1) < self.max_attempts;
        if has_budget && self.should_retry(error) {
            RetryDecision {
                should_retry: true,
                delay_ms: self.calculate_delay(attempt_index).as_millis() as u64,
            }
        } else {
            RetryDecision {
                should_retry: false,
                delay_ms: 0,
            }
        }
    }
}

fn mentions_transient(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let e = EngineError::api_error(404, "missing");
        assert!(!RetryPolicy::classify(&e, None));
        assert!(RetryPolicy::classify(&EngineError::api_error(503, "down"), None));
        assert!(RetryPolicy::classify(&EngineError::RateLimitError("x".into()), None));
        // An explicit status wins over the variant.
        assert!(RetryPolicy::classify(&e, Some(502)));
    }

    #[test]
    fn transport_errors_need_transient_wording() {
        assert!(!RetryPolicy::classify(&EngineError::HttpError("connection refused".into()), None));
        assert!(RetryPolicy::classify(&EngineError::HttpError("operation timed out".into()), None));
        assert!(RetryPolicy::classify(
            &EngineError::UpstreamTaskFailed("Rate limit reached, try later".into()),
            None
        ));
        assert!(!RetryPolicy::classify(
            &EngineError::CredentialError("request timeout".into()),
            None
        ));
    }

    #[test]
    fn delay_respects_bounds() {
        for _ in 0..200 {
            let d = backoff_delay(3, 2000, 30_000);
            assert!((16_000..=16_600).contains(&d), "{d}");
            let capped = backoff_delay(10, 2000, 30_000);
            assert!((30_000..=30_600).contains(&capped), "{capped}");
        }
        assert_eq!(backoff_delay(u32::MAX, 0, 10), 0);
    }

    #[test]
    fn decide_stops_at_cap() {
        let p = RetryPolicy::fast().with_max_attempts(2);
        let e = EngineError::api_error(500, "boom");
        assert!(p.decide(&e, 0).should_retry);
        assert!(!p.decide(&e, 1).should_retry);
        let d = p.decide(&e, 0).delay_ms;
        assert!((500..=650).contains(&d));
    }
}
