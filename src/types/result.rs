use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::safety::SafetyVerdict;

/// Where the generated image can be found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResultRef {
    Url { url: String },
    #[serde(rename_all = "camelCase")]
    Inline { mime_type: String, data_base64: String },
}

/// Terminal state of the orchestrator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    Done,
    Failed,
}

/// One INVOKE attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retryable: bool,
    /// Wait before the next attempt, when one followed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
    pub elapsed_ms: u64,
}

/// Provider-side diagnostics returned with every result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDiagnostics {
    pub provider: String,
    pub endpoint: String,
    pub request_id: String,
    pub attempts: u32,
    pub attempt_log: Vec<AttemptRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_task_id: Option<String>,
    pub duration_ms: u64,
    pub final_state: TerminalState,
}

/// Error payload safe to hand back to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl From<&EngineError> for ErrorBody {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Unified outcome of `generate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<ResultRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyVerdict>,
    pub provider_diagnostics: ProviderDiagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl GenerationResult {
    pub fn is_done(&self) -> bool {
        self.provider_diagnostics.final_state == TerminalState::Done
    }
}

/// Outcome of `generate_prompt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety: Option<SafetyVerdict>,
    pub provider_diagnostics: ProviderDiagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}
