//! Clients for the two external services and the resilience layer
//! wrapped around them.

pub mod circuit;
mod http;
pub mod openai;
pub mod rate_limit;
pub mod reliable;
pub mod retry;
pub mod threads;

pub mod mock;

pub use circuit::{BreakerConfig, CircuitBreaker, CircuitOpen, CircuitState};
pub use openai::OpenAiGenerator;
pub use rate_limit::RateLimiter;
pub use reliable::{Guard, GuardConfig, GuardError, ReliableGenerator, ReliablePublisher};
pub use retry::{retry_with_backoff, retry_with_backoff_if, RetryError, RetryPolicy, Retryable};
pub use threads::ThreadsPublisher;
