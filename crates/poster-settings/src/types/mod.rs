//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values, so a partial JSON file only needs the
//! fields it changes.

mod pipeline;
mod runtime;
mod schedule;
mod services;

pub use pipeline::*;
pub use runtime::*;
pub use schedule::*;
pub use services::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "schedule": { "maxDailyPosts": 12, "quietHours": { "start": 0, "end": 8 } },
///   "publisher": { "userId": "1789..." }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PosterSettings {
    pub schedule: ScheduleSettings,
    pub pipeline: PipelineSettings,
    pub cache: CacheSettings,
    pub resilience: ResilienceSettings,
    pub monitor: MonitorSettings,
    pub generator: GeneratorSettings,
    pub publisher: PublisherSettings,
    pub storage: StorageSettings,
    pub telemetry: TelemetrySettings,
}

impl PosterSettings {
    /// Longest one guarded publish can legitimately take: every attempt
    /// runs both requests and the phase delay, plus the backoff between
    /// attempts and one full rate-limit window.
    pub fn publish_budget_secs(&self) -> u64 {
        let guard = &self.resilience.publisher;
        let attempts = u64::from(guard.retry.max_attempts.max(1));
        let per_attempt = 2 * self.publisher.request_timeout_secs + self.publisher.phase_delay_secs;
        let mut backoff_ms = 0u64;
        let mut delay = guard.retry.initial_delay_ms as f64;
        for _ in 1..attempts {
            backoff_ms += (delay as u64).min(guard.retry.max_delay_ms);
            delay *= guard.retry.backoff_factor;
        }
        attempts * per_attempt + backoff_ms.div_ceil(1000) + guard.rate_limit.window_secs
    }

    /// Reject configurations the scheduler or pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.schedule;
        if s.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(SettingsError::UnknownTimezone(s.timezone.clone()));
        }
        let ranges = s
            .prime_time
            .iter()
            .chain([&s.quiet_hours, &self.pipeline.night_hours]);
        for r in ranges {
            if !r.is_valid() {
                return Err(invalid(format!("hour range {}-{} outside 0-23", r.start, r.end)));
            }
        }
        if s.quiet_hours.covers_whole_day() {
            return Err(invalid("quiet hours cover the whole day"));
        }
        if s.quiet_push_hours == 0 {
            return Err(invalid("quietPushHours must be positive"));
        }
        if s.max_daily_posts == 0 {
            return Err(invalid("maxDailyPosts must be positive"));
        }
        if s.poll_interval_secs == 0 {
            return Err(invalid("pollIntervalSecs must be positive"));
        }
        for (name, interval) in std::iter::once(("interval", &s.interval))
            .chain(s.prime_interval.as_ref().map(|i| ("primeInterval", i)))
        {
            if interval.min_secs == 0 || interval.min_secs > interval.max_secs {
                return Err(invalid(format!(
                    "{name} bounds {}..{} are inverted or zero",
                    interval.min_secs, interval.max_secs
                )));
            }
        }

        let p = &self.pipeline;
        if p.topics.is_empty() {
            return Err(invalid("pipeline.topics is empty"));
        }
        if p.max_attempts == 0 {
            return Err(invalid("pipeline.maxAttempts must be positive"));
        }
        let v = &p.validation;
        if v.min_length > v.max_length || v.truncate_to > v.max_length {
            return Err(invalid("validation length bounds are inconsistent"));
        }
        if v.min_emoji > v.max_emoji {
            return Err(invalid("validation emoji bounds are inverted"));
        }

        let budget = self.publish_budget_secs();
        if self.monitor.publish_timeout_secs < budget {
            return Err(invalid(format!(
                "monitor.publishTimeoutSecs {} is shorter than one publish can take ({budget}s)",
                self.monitor.publish_timeout_secs
            )));
        }

        for (name, guard) in [
            ("generator", &self.resilience.generator),
            ("publisher", &self.resilience.publisher),
        ] {
            if guard.retry.max_attempts == 0 {
                return Err(invalid(format!("{name}.retry.maxAttempts must be positive")));
            }
            if guard.retry.backoff_factor < 1.0 {
                return Err(invalid(format!("{name}.retry.backoffFactor below 1.0")));
            }
            if guard.breaker.failure_threshold == 0 || guard.rate_limit.max_requests == 0 {
                return Err(invalid(format!("{name} breaker/limiter thresholds must be positive")));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue(msg.into())
}
