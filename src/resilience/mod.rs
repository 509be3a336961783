//! Resilience
//!
//! Exponential backoff retry with jitter.

pub mod retry;

pub use retry::{create_retry_strategy, RetryConfig, RetryStrategy};
