use std::fmt;
use std::time::Instant;

use crate::providers::ProviderId;
use crate::types::{AttemptRecord, ProviderDiagnostics, TerminalState};

/// Orchestrator states, in the order a request moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    SelectProvider,
    BuildRequest,
    AcquireCredential,
    Invoke,
    RetryWait,
    NormalizeSafety,
    Done,
    Failed,
}

impl State {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SelectProvider => "SELECT_PROVIDER",
            Self::BuildRequest => "BUILD_REQUEST",
            Self::AcquireCredential => "ACQUIRE_CREDENTIAL",
            Self::Invoke => "INVOKE",
            Self::RetryWait => "RETRY_WAIT",
            Self::NormalizeSafety => "NORMALIZE_SAFETY",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostics gathered while one request runs.
pub(crate) struct RunTrace {
    provider: ProviderId,
    request_id: String,
    started: Instant,
    pub endpoint: String,
    pub attempts: Vec<AttemptRecord>,
    pub aspect_ratio: Option<String>,
    pub upstream_task_id: Option<String>,
}

impl RunTrace {
    pub fn new(provider: ProviderId, request_id: String) -> Self {
        Self {
            provider,
            request_id,
            started: Instant::now(),
            endpoint: String::new(),
            attempts: Vec::new(),
            aspect_ratio: None,
            upstream_task_id: None,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn enter(&self, state: State) {
        tracing::debug!(state = state.as_str(), elapsed_ms = self.elapsed_ms(), "state transition");
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn finish(self, final_state: TerminalState) -> ProviderDiagnostics {
        let duration_ms = self.elapsed_ms();
        ProviderDiagnostics {
            provider: self.provider.as_str().to_string(),
            endpoint: self.endpoint,
            request_id: self.request_id,
            attempts: self.attempts.len() as u32,
            attempt_log: self.attempts,
            aspect_ratio: self.aspect_ratio,
            upstream_task_id: self.upstream_task_id,
            duration_ms,
            final_state,
        }
    }
}
