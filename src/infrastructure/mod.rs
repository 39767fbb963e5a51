//! Shared infrastructure: backoff and retry primitives.

pub mod backoff;
pub mod retry;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use retry::{retry_with_backoff, RetryPolicy};
