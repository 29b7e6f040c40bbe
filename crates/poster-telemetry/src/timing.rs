use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::metrics::Telemetry;

/// Running timer for one named operation.
///
/// Dropping without [`stop`](Self::stop) discards the measurement.
#[must_use = "call stop() to record the duration"]
pub struct OperationTimer<'a> {
    telemetry: &'a Telemetry,
    name: String,
    started: Instant,
}

impl<'a> OperationTimer<'a> {
    pub(crate) fn new(telemetry: &'a Telemetry, name: &str) -> Self {
        Self {
            telemetry,
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn stop(self) -> Duration {
        let elapsed = self.started.elapsed();
        self.telemetry.record_duration(&self.name, elapsed);
        elapsed
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct OperationStats {
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    pub p50: Duration,
    pub p95: Duration,
}

/// Last N durations for one operation, oldest evicted first.
pub(crate) struct OperationHistory {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl OperationHistory {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, d: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(d);
    }

    pub(crate) fn stats(&self) -> Option<OperationStats> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<Duration> = self.samples.iter().copied().collect();
        sorted.sort();
        let count = sorted.len();
        let total: Duration = sorted.iter().sum();
        let pick = |q: f64| sorted[((count as f64 * q) as usize).min(count - 1)];
        Some(OperationStats {
            count,
            min: sorted[0],
            max: sorted[count - 1],
            avg: total / count as u32,
            p50: pick(0.5),
            p95: pick(0.95),
        })
    }
}
