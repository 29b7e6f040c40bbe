//! Outbound service settings: endpoints, credentials, and the guards around them.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Retry-with-backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Total attempts, first call included.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub half_open_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 60,
            half_open_timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RateLimitSettings {
    pub max_requests: usize,
    pub window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
        }
    }
}

/// Full guard stack for one outbound dependency.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GuardSettings {
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub rate_limit: RateLimitSettings,
}

/// Each dependency owns its own breaker and limiter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResilienceSettings {
    pub generator: GuardSettings,
    pub publisher: GuardSettings,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            generator: GuardSettings::default(),
            publisher: GuardSettings {
                rate_limit: RateLimitSettings {
                    max_requests: 10,
                    window_secs: 60,
                },
                ..GuardSettings::default()
            },
        }
    }
}

/// OpenAI-compatible chat completion endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeneratorSettings {
    pub base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,
    /// Read from the environment only; never written back to disk.
    #[serde(skip)]
    pub api_key: Option<SecretString>,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4-turbo-preview".to_string(),
            request_timeout_secs: 60,
            api_key: None,
        }
    }
}

/// Threads publishing endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PublisherSettings {
    pub base_url: String,
    pub user_id: String,
    /// Wait between container creation and publish confirmation.
    pub phase_delay_secs: u64,
    pub request_timeout_secs: u64,
    #[serde(skip)]
    pub access_token: Option<SecretString>,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            base_url: "https://graph.threads.net/v1.0".to_string(),
            user_id: String::new(),
            phase_delay_secs: 30,
            request_timeout_secs: 30,
            access_token: None,
        }
    }
}
