//! Process-level settings: caches, control loop, storage, telemetry.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// TTL for today's post count.
    pub count_ttl_secs: u64,
    /// LRU capacity for post records.
    pub post_cache_size: usize,
    pub personality_ttl_secs: u64,
    pub personality_cache_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            count_ttl_secs: 3600,
            post_cache_size: 1000,
            personality_ttl_secs: 3600,
            personality_cache_size: 16,
        }
    }
}

/// Control loop backoffs and bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorSettings {
    /// Backoff after the pipeline produced nothing.
    pub no_content_backoff_secs: u64,
    pub publish_failure_backoff_secs: u64,
    pub storage_backoff_secs: u64,
    /// Bound on one publish call, retries and phase delay included. Must
    /// cover [`PosterSettings::publish_budget_secs`](crate::PosterSettings::publish_budget_secs).
    pub publish_timeout_secs: u64,
    pub store_timeout_secs: u64,
    /// Oldest posts beyond this count are deleted after each recording.
    pub max_stored_posts: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            no_content_backoff_secs: 300,
            publish_failure_backoff_secs: 600,
            storage_backoff_secs: 300,
            publish_timeout_secs: 600,
            store_timeout_secs: 30,
            max_stored_posts: 10_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: crate::loader::poster_home()
                .join("poster.db")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    pub json: bool,
    /// Metrics snapshot database. Shares the storage database when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_db_path: Option<String>,
    pub retention_days: u32,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            metrics_db_path: None,
            retention_days: 7,
        }
    }
}
