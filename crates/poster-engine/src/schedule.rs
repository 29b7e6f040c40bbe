use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use poster_settings::{HourRange, IntervalRange, ScheduleSettings, SettingsError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Enough pushes to walk any non-full quiet range.
const MAX_QUIET_PUSHES: u32 = 24;

/// Snapshot of the schedule for logging.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimeInfo {
    pub local_time: String,
    pub is_prime_time: bool,
    pub next_post_time: Option<DateTime<Utc>>,
    pub timezone: String,
}

/// Decides when to post.
///
/// The only state is the stored `next_post_time`, which moves forward
/// exactly once each time [`should_post`](Self::should_post) says yes.
pub struct SchedulingPolicy {
    tz: Tz,
    prime_time: Vec<HourRange>,
    quiet_hours: HourRange,
    quiet_push: chrono::Duration,
    interval: IntervalRange,
    prime_interval: Option<IntervalRange>,
    rng: Mutex<StdRng>,
    next_post_time: Mutex<Option<DateTime<Utc>>>,
}

impl SchedulingPolicy {
    pub fn new(settings: &ScheduleSettings) -> Result<Self, SettingsError> {
        let tz: Tz = settings
            .timezone
            .parse()
            .map_err(|_| SettingsError::UnknownTimezone(settings.timezone.clone()))?;
        Ok(Self {
            tz,
            prime_time: settings.prime_time.clone(),
            quiet_hours: settings.quiet_hours,
            quiet_push: chrono::Duration::hours(i64::from(settings.quiet_push_hours.max(1))),
            interval: settings.interval,
            prime_interval: settings.prime_interval,
            rng: Mutex::new(StdRng::from_entropy()),
            next_post_time: Mutex::new(None),
        })
    }

    /// Fix the random source, for reproducible schedules.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn local_hour(&self, at: DateTime<Utc>) -> u32 {
        at.with_timezone(&self.tz).hour()
    }

    pub fn is_prime_time(&self, hour: u32) -> bool {
        self.prime_time.iter().any(|r| r.contains(hour))
    }

    pub fn is_quiet(&self, at: DateTime<Utc>) -> bool {
        self.quiet_hours.contains(self.local_hour(at))
    }

    /// Interval bounds in effect at `now`; halved in prime time unless an
    /// explicit prime interval is configured.
    pub fn interval_bounds(&self, now: DateTime<Utc>) -> (u64, u64) {
        let general = (self.interval.min_secs, self.interval.max_secs);
        if !self.is_prime_time(self.local_hour(now)) {
            return general;
        }
        match self.prime_interval {
            Some(p) => (p.min_secs, p.max_secs),
            None => (general.0 / 2, general.1 / 2),
        }
    }

    /// Draw a candidate next-post time. Does not store it.
    pub fn next_post_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let (min, max) = self.interval_bounds(now);
        let secs = if min >= max {
            min
        } else {
            self.rng.lock().gen_range(min..=max)
        };
        let mut at = now + chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000));
        let mut pushes = 0;
        while self.is_quiet(at) {
            if pushes == MAX_QUIET_PUSHES {
                warn!(at = %at, "could not push post time out of quiet hours");
                break;
            }
            at += self.quiet_push;
            pushes += 1;
        }
        debug!(interval_secs = secs, pushes, next = %at, "drew next post time");
        at
    }

    /// Whether to post now. On `true` the stored next-post time advances.
    ///
    /// Quiet hours suppress posting outright, so a slot missed while the
    /// quota was full does not fire just after midnight.
    pub fn should_post(&self, now: DateTime<Utc>, daily_count: u32, max_daily_posts: u32) -> bool {
        if daily_count >= max_daily_posts {
            debug!(daily_count, max_daily_posts, "daily quota reached");
            return false;
        }
        if self.is_quiet(now) {
            return false;
        }
        let mut next = self.next_post_time.lock();
        if next.is_some_and(|t| now < t) {
            return false;
        }
        let advanced = self.next_post_time(now);
        info!(
            next = %advanced.with_timezone(&self.tz),
            cold_start = next.is_none(),
            "post slot open, schedule advanced"
        );
        *next = Some(advanced);
        true
    }

    /// The stored next-post time, if one has been computed.
    pub fn scheduled(&self) -> Option<DateTime<Utc>> {
        *self.next_post_time.lock()
    }

    /// Restore a schedule, e.g. after restart.
    pub fn set_scheduled(&self, at: Option<DateTime<Utc>>) {
        *self.next_post_time.lock() = at;
    }

    /// Zero when a slot is already open.
    pub fn time_until_next(&self, now: DateTime<Utc>) -> Duration {
        self.scheduled()
            .and_then(|t| (t - now).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }

    pub fn time_info(&self, now: DateTime<Utc>) -> TimeInfo {
        let local = now.with_timezone(&self.tz);
        TimeInfo {
            local_time: local.format("%Y-%m-%d %H:%M:%S").to_string(),
            is_prime_time: self.is_prime_time(local.hour()),
            next_post_time: self.scheduled(),
            timezone: self.tz.name().to_string(),
        }
    }
}
