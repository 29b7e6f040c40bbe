use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use poster_core::{ExternalError, GenerationOutput, GenerationRequest, PostId, Publisher, TextGenerator};
use poster_settings::GuardSettings;
use poster_telemetry::Telemetry;
use tracing::{info, warn};

use crate::circuit::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::rate_limit::RateLimiter;
use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("circuit open for {service}")]
    CircuitOpen { service: String },
    #[error(transparent)]
    Retry(#[from] RetryError<ExternalError>),
    #[error("{service} call timed out after {after:?}")]
    Timeout { service: String, after: Duration },
}

impl GuardError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Retry(RetryError::Exhausted { .. }) => "retries_exhausted",
            Self::Retry(RetryError::Rejected(e)) => e.error_kind(),
            Self::Timeout { .. } => "timeout",
        }
    }

    /// The guarded call may have taken effect despite the error, so
    /// repeating it could apply it twice.
    pub fn outcome_unknown(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => false,
            Self::Timeout { .. } => true,
            Self::Retry(e) => matches!(e, RetryError::Rejected(ExternalError::Unconfirmed(_))),
        }
    }
}

/// Everything needed to build a [`Guard`].
#[derive(Clone, Debug)]
pub struct GuardConfig {
    pub retry: RetryPolicy,
    pub breaker: BreakerConfig,
    pub max_requests: usize,
    pub window: Duration,
    /// Bound on one guarded call, retries included.
    pub timeout: Option<Duration>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self::from(&GuardSettings::default())
    }
}

impl From<&GuardSettings> for GuardConfig {
    fn from(s: &GuardSettings) -> Self {
        Self {
            retry: RetryPolicy {
                max_attempts: s.retry.max_attempts,
                initial_delay: Duration::from_millis(s.retry.initial_delay_ms),
                max_delay: Duration::from_millis(s.retry.max_delay_ms),
                backoff_factor: s.retry.backoff_factor,
            },
            breaker: BreakerConfig {
                failure_threshold: s.breaker.failure_threshold,
                reset_timeout: Duration::from_secs(s.breaker.reset_timeout_secs),
                half_open_timeout: Duration::from_secs(s.breaker.half_open_timeout_secs),
            },
            max_requests: s.rate_limit.max_requests,
            window: Duration::from_secs(s.rate_limit.window_secs),
            timeout: None,
        }
    }
}

impl GuardConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Circuit breaker outside, retry-with-backoff inside, rate limiter on
/// every attempt. One guard per outbound dependency.
pub struct Guard {
    service: String,
    breaker: CircuitBreaker,
    limiter: RateLimiter,
    retry: RetryPolicy,
    timeout: Option<Duration>,
    telemetry: Arc<Telemetry>,
}

impl Guard {
    pub fn new(service: &str, config: GuardConfig, telemetry: Arc<Telemetry>) -> Self {
        Self {
            service: service.to_string(),
            breaker: CircuitBreaker::new(service, config.breaker),
            limiter: RateLimiter::new(service, config.max_requests, config.window),
            retry: config.retry,
            timeout: config.timeout,
            telemetry,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `op` under the guard. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, GuardError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ExternalError>>,
    {
        if !self.breaker.can_execute() {
            self.telemetry.counter_inc(&format!("{}.circuit_rejections", self.service), 1);
            return Err(GuardError::CircuitOpen {
                service: self.service.clone(),
            });
        }

        let name = format!("{}.{operation}", self.service);
        let requests = format!("{}.requests", self.service);
        let attempts = retry_with_backoff(&self.retry, &name, |attempt| {
            self.telemetry.counter_inc(&requests, 1);
            if attempt > 1 {
                self.telemetry.counter_inc(&format!("{}.retries", self.service), 1);
            }
            let call = op(attempt);
            async move {
                self.limiter.acquire().await;
                call.await
            }
        });
        let timer = self.telemetry.start_operation(&name);

        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempts).await {
                Ok(r) => r.map_err(GuardError::from),
                Err(_) => Err(GuardError::Timeout {
                    service: self.service.clone(),
                    after: limit,
                }),
            },
            None => attempts.await.map_err(GuardError::from),
        };

        match &result {
            Ok(_) => {
                timer.stop();
                self.breaker.record_success();
            }
            Err(e) => {
                drop(timer);
                self.breaker.record_failure();
                self.telemetry.counter_inc(&format!("{}.errors", self.service), 1);
                warn!(service = %self.service, operation, kind = e.error_kind(), error = %e, "guarded call failed");
            }
        }
        result
    }
}

/// Text generator behind a [`Guard`].
pub struct ReliableGenerator {
    inner: Arc<dyn TextGenerator>,
    guard: Guard,
}

impl ReliableGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>, config: GuardConfig, telemetry: Arc<Telemetry>) -> Self {
        Self {
            inner,
            guard: Guard::new("generator", config, telemetry),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn model(&self) -> &str {
        self.inner.model()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.guard.circuit_state()
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<GenerationOutput, GuardError> {
        let output = self
            .guard
            .run("generate", |_| self.inner.generate(request))
            .await?;
        self.guard.telemetry.counter_inc("generator.tokens", output.usage.total());
        info!(
            model = self.inner.model(),
            prompt_tokens = output.usage.prompt_tokens,
            completion_tokens = output.usage.completion_tokens,
            latency_ms = output.latency.as_millis() as u64,
            "generation complete"
        );
        Ok(output)
    }
}

/// Publisher behind a [`Guard`].
pub struct ReliablePublisher {
    inner: Arc<dyn Publisher>,
    guard: Guard,
}

impl ReliablePublisher {
    pub fn new(inner: Arc<dyn Publisher>, config: GuardConfig, telemetry: Arc<Telemetry>) -> Self {
        Self {
            inner,
            guard: Guard::new("publisher", config, telemetry),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.guard.circuit_state()
    }

    pub async fn publish(&self, text: &str) -> Result<PostId, GuardError> {
        let id = self.guard.run("publish", |_| self.inner.publish(text)).await?;
        self.guard.telemetry.counter_inc("publisher.posts", 1);
        Ok(id)
    }

    pub async fn get(&self, id: &PostId) -> Result<Option<serde_json::Value>, GuardError> {
        self.guard.run("get", |_| self.inner.get(id)).await
    }

    pub async fn delete(&self, id: &PostId) -> Result<bool, GuardError> {
        self.guard.run("delete", |_| self.inner.delete(id)).await
    }
}
