//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PosterSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `POSTER_*` environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{HourRange, PosterSettings};

/// `~/.poster`, falling back to `/tmp/.poster` without a home directory.
pub fn poster_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".poster")
}

/// Resolve the path to the settings file (`~/.poster/settings.json`).
pub fn settings_path() -> PathBuf {
    poster_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PosterSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. Invalid JSON or a
/// configuration that fails [`PosterSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PosterSettings> {
    let defaults = serde_json::to_value(PosterSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: PosterSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Integers must parse and sit within the given range, booleans accept
/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`. Invalid values are
/// logged and ignored.
pub fn apply_env_overrides(settings: &mut PosterSettings) {
    // ── Schedule ────────────────────────────────────────────────────
    if let Some(v) = read_env_string("POSTER_TIMEZONE") {
        settings.schedule.timezone = v;
    }
    if let Some(v) = read_env_u32("POSTER_MAX_DAILY_POSTS", 1, 1000) {
        settings.schedule.max_daily_posts = v;
    }
    if let Some(v) = read_env_u64("POSTER_POLL_INTERVAL_SECS", 1, 3600) {
        settings.schedule.poll_interval_secs = v;
    }
    if let (Some(start), Some(end)) = (
        read_env_u32("POSTER_QUIET_START", 0, 23),
        read_env_u32("POSTER_QUIET_END", 0, 23),
    ) {
        settings.schedule.quiet_hours = HourRange::new(start, end);
    }
    if let (Some(start), Some(end)) = (
        read_env_u32("POSTER_PRIME_START", 0, 23),
        read_env_u32("POSTER_PRIME_END", 0, 23),
    ) {
        settings.schedule.prime_time = vec![HourRange::new(start, end)];
    }

    // ── Generator ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("POSTER_OPENAI_BASE_URL") {
        settings.generator.base_url = v;
    }
    if let Some(v) = read_env_string("POSTER_OPENAI_MODEL") {
        settings.generator.model = v;
    }
    if let Some(v) = read_env_string("POSTER_OPENAI_API_KEY").or_else(|| read_env_string("OPENAI_API_KEY")) {
        settings.generator.api_key = Some(SecretString::from(v));
    }

    // ── Publisher ───────────────────────────────────────────────────
    if let Some(v) = read_env_string("POSTER_THREADS_USER_ID") {
        settings.publisher.user_id = v;
    }
    if let Some(v) = read_env_string("POSTER_THREADS_ACCESS_TOKEN") {
        settings.publisher.access_token = Some(SecretString::from(v));
    }
    if let Some(v) = read_env_u64("POSTER_PHASE_DELAY_SECS", 0, 600) {
        settings.publisher.phase_delay_secs = v;
    }

    // ── Storage / telemetry ─────────────────────────────────────────
    if let Some(v) = read_env_string("POSTER_DB_PATH") {
        settings.storage.db_path = v;
    }
    if let Some(v) = read_env_string("POSTER_LOG_LEVEL") {
        settings.telemetry.level = v;
    }
    if let Some(v) = read_env_bool("POSTER_LOG_JSON") {
        settings.telemetry.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u32 env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
