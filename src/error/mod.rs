//! Error Handling Module
//!
//! This module provides the error taxonomy for the engine:
//! - Core error type (`EngineError`) and coarse `ErrorCategory`
//! - HTTP failure classification (`classify_http_error`)
//! - Conversions from common error types
//!
//! # Example
//!
//! ```rust,ignore
//! use genbridge::error::{EngineError, ErrorCategory};
//!
//! let error = EngineError::api_error(404, "Not found");
//! assert_eq!(error.category(), ErrorCategory::Client);
//! assert!(!error.is_retryable());
//! ```

mod classify;
mod conversions;
pub mod types;

pub use classify::classify_http_error;
pub use types::*;
