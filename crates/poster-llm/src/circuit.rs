use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    /// Time spent OPEN before a probe is admitted.
    pub reset_timeout: Duration,
    /// Time after an unanswered probe before another is admitted.
    pub half_open_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("circuit open for {service}")]
pub struct CircuitOpen {
    pub service: String,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_probe: Option<Instant>,
}

/// Per-dependency circuit breaker.
///
/// CLOSED until `failure_threshold` consecutive failures, then OPEN. Once
/// `reset_timeout` has passed since the last failure one probe is admitted
/// (HALF_OPEN); its success closes the circuit, its failure reopens it.
pub struct CircuitBreaker {
    service: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
                last_probe: None,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Whether the guarded call may run now. May move OPEN to HALF_OPEN.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let state = inner.state;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure
                    .map_or(true, |t| now.duration_since(t) >= self.config.reset_timeout);
                if cooled {
                    info!(service = %self.service, "circuit half-open, admitting probe");
                    inner.state = CircuitState::HalfOpen;
                    inner.last_probe = Some(now);
                }
                cooled
            }
            CircuitState::HalfOpen => {
                let stale = inner
                    .last_probe
                    .map_or(true, |t| now.duration_since(t) >= self.config.half_open_timeout);
                if stale {
                    inner.last_probe = Some(now);
                }
                stale
            }
        }
    }

    /// `can_execute` as a `Result`, for use with `?`.
    pub fn check(&self) -> Result<(), CircuitOpen> {
        if self.can_execute() {
            Ok(())
        } else {
            Err(CircuitOpen {
                service: self.service.clone(),
            })
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            info!(service = %self.service, "circuit closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_probe = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        let state = inner.state;
        let trip = match state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            warn!(
                service = %self.service,
                failures = inner.failure_count,
                reset_secs = self.config.reset_timeout.as_secs(),
                "circuit opened"
            );
            inner.state = CircuitState::Open;
            inner.last_probe = None;
        }
    }
}
