//! Retry classification, backoff and the attempt loop.

mod executor;
mod policy;

pub use executor::{RetryExecutor, RetryOutcome};
pub use policy::{JITTER_RATIO, RetryDecision, RetryMode, RetryPolicy, backoff_delay};
