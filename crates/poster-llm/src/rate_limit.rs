use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Sliding-window limiter: at most `max_requests` admissions in any
/// `window`-long span.
///
/// Waiters queue on the log lock, so admissions are FIFO. A cancelled
/// `acquire` leaves no entry behind.
pub struct RateLimiter {
    service: String,
    max_requests: usize,
    window: Duration,
    log: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(service: impl Into<String>, max_requests: usize, window: Duration) -> Self {
        Self {
            service: service.into(),
            max_requests: max_requests.max(1),
            window,
            log: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    fn prune(&self, log: &mut VecDeque<Instant>, now: Instant) {
        while log
            .front()
            .is_some_and(|ts| now.duration_since(*ts) >= self.window)
        {
            log.pop_front();
        }
    }

    /// Wait until a slot is free, then claim it.
    pub async fn acquire(&self) {
        let mut log = self.log.lock().await;
        loop {
            let now = Instant::now();
            self.prune(&mut log, now);
            if log.len() < self.max_requests {
                log.push_back(now);
                return;
            }
            if let Some(&oldest) = log.front() {
                let wake = oldest + self.window;
                debug!(
                    service = %self.service,
                    wait_ms = wake.duration_since(now).as_millis() as u64,
                    "rate limit reached, waiting"
                );
                tokio::time::sleep_until(wake).await;
            }
        }
    }

    /// Claim a slot only if one is free right now.
    pub async fn try_acquire(&self) -> bool {
        let mut log = self.log.lock().await;
        let now = Instant::now();
        self.prune(&mut log, now);
        if log.len() < self.max_requests {
            log.push_back(now);
            true
        } else {
            false
        }
    }

    /// Admissions currently counted against the window.
    pub async fn in_window(&self) -> usize {
        let mut log = self.log.lock().await;
        self.prune(&mut log, Instant::now());
        log.len()
    }
}
