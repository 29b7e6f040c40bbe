//! Posting cadence settings.

use serde::{Deserialize, Serialize};

/// Inclusive hour range on a 24h clock. `start > end` wraps past midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// `start <= hour <= end`, or `hour >= start || hour <= end` when wrapping.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            self.start <= hour && hour <= self.end
        } else {
            hour >= self.start || hour <= self.end
        }
    }

    /// True when every hour of the day falls inside the range.
    pub fn covers_whole_day(&self) -> bool {
        (0..24).all(|h| self.contains(h))
    }

    pub fn is_valid(&self) -> bool {
        self.start < 24 && self.end < 24
    }
}

/// Half-open interval bounds in seconds between posts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

/// Scheduling policy settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduleSettings {
    /// IANA timezone the hour ranges are expressed in.
    pub timezone: String,
    /// Hour ranges with denser posting.
    pub prime_time: Vec<HourRange>,
    /// Computed post times landing here get pushed forward. Inclusive, so
    /// 23-6 keeps posts out of 23:00-06:59.
    pub quiet_hours: HourRange,
    /// Step used to push a post time out of quiet hours.
    pub quiet_push_hours: u32,
    /// Random interval between posts.
    pub interval: IntervalRange,
    /// Explicit prime-time interval. When unset the general interval is halved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prime_interval: Option<IntervalRange>,
    pub max_daily_posts: u32,
    /// Upper bound on a single wait in the control loop.
    pub poll_interval_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            timezone: "Asia/Taipei".to_string(),
            prime_time: vec![HourRange::new(20, 2)],
            quiet_hours: HourRange::new(23, 6),
            quiet_push_hours: 8,
            interval: IntervalRange {
                min_secs: 3600,
                max_secs: 10_800,
            },
            prime_interval: None,
            max_daily_posts: 40,
            poll_interval_secs: 300,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_wrapping_range() {
        let r = HourRange::new(9, 17);
        assert!(r.contains(9));
        assert!(r.contains(17));
        assert!(!r.contains(8));
        assert!(!r.contains(18));
    }

    #[test]
    fn wrapping_range() {
        let r = HourRange::new(20, 2);
        for h in [20, 21, 23, 0, 1, 2] {
            assert!(r.contains(h), "hour {h}");
        }
        for h in [3, 10, 19] {
            assert!(!r.contains(h), "hour {h}");
        }
    }

    #[test]
    fn whole_day_detection() {
        assert!(HourRange::new(0, 23).covers_whole_day());
        assert!(HourRange::new(5, 4).covers_whole_day());
        assert!(!HourRange::new(23, 7).covers_whole_day());
    }

    #[test]
    fn defaults() {
        let s = ScheduleSettings::default();
        assert_eq!(s.max_daily_posts, 40);
        assert_eq!(s.quiet_hours, HourRange::new(23, 6));
        assert!(s.prime_interval.is_none());
    }

    #[test]
    fn camel_case_fields() {
        let json = serde_json::to_value(ScheduleSettings::default()).unwrap();
        assert!(json.get("maxDailyPosts").is_some());
        assert!(json.get("quietPushHours").is_some());
        assert!(json.get("primeInterval").is_none());
    }
}
