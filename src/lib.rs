//! # genbridge
//!
//! Provider orchestration and image intelligence for face swap, enhancement
//! and upscaling backends.
//!
//! The engine takes a [`GenerationRequest`], picks one upstream from a closed
//! set of providers, shapes the call, obtains credentials, retries transient
//! failures and folds the upstream's safety signals into a single
//! [`SafetyVerdict`]. Every call ends in a [`GenerationResult`] carrying
//! diagnostics safe to log and to return to API callers.
//!
//! ```rust,no_run
//! use genbridge::prelude::*;
//!
//! # async fn demo() -> Result<(), EngineError> {
//! let config = EngineConfig::from_env()?;
//! let engine = ProviderOrchestrator::new(config)?;
//! let request = GenerationRequest::builder(ImageRef::url("https://example.com/target.jpg"))
//!     .source_image(ImageRef::url("https://example.com/face.jpg"))
//!     .aspect_ratio("original")
//!     .build();
//! let result = engine.generate(request).await;
//! println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod image;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod safety;
pub mod telemetry;
pub mod types;
pub mod utils;

pub use config::EngineConfig;
pub use error::EngineError;
pub use image::{AspectRatioCatalog, AspectRatioResolver, ImageMetrics, inspect_image};
pub use orchestrator::ProviderOrchestrator;
pub use providers::ProviderId;
pub use retry::{RetryMode, RetryPolicy};
pub use safety::{SafetyNormalizer, SafetyStrictness, SafetyVerdict};
pub use types::{GenerationRequest, GenerationResult, ImageRef, PromptResult};

/// Commonly used types.
pub mod prelude {
    pub use crate::auth::{CredentialBroker, InMemoryTokenCache, ServiceAccountCredentials};
    pub use crate::config::{EngineConfig, RapidApiConfig, VertexConfig, VisionConfig, WaveSpeedConfig};
    pub use crate::error::EngineError;
    pub use crate::orchestrator::ProviderOrchestrator;
    pub use crate::providers::{ProviderId, WaveSpeedModel};
    pub use crate::retry::RetryMode;
    pub use crate::safety::{SafetyStrictness, SafetyVerdict};
    pub use crate::types::{GenerationRequest, GenerationResult, ImageRef, ResultRef};
}
