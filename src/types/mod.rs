//! Request and result types exchanged with route handlers.

mod request;
mod result;

pub use request::{GenerationRequest, GenerationRequestBuilder, ImageRef};
pub use result::{
    AttemptRecord, ErrorBody, GenerationResult, ProviderDiagnostics, PromptResult, ResultRef,
    TerminalState,
};
