//! Resilience module
//!
//! Failure classification, exponential-backoff retry and circuit breaking
//! for calls into the database.

pub mod circuit_breaker;
pub mod classifier;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use classifier::{classify, is_transient_error, ErrorClass};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy};
