//! Resilience Module
//! Retry with exponential backoff for broker connections and requests

mod retry;

pub use retry::{with_retry_async, RetryConfig};
