mod metrics;
mod timing;

pub use metrics::{MetricType, MetricsSnapshot, Telemetry};
pub use timing::{OperationStats, OperationTimer};

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "poster_llm" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// JSON lines instead of the compact human format.
    pub json: bool,
    /// Snapshot retention applied when the guard flushes.
    pub retention_days: u32,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
            retention_days: 7,
        }
    }
}

impl TelemetryConfig {
    /// Parse a level name, keeping INFO for anything unrecognised.
    pub fn with_level_name(mut self, name: &str) -> Self {
        self.log_level = name.parse().unwrap_or(Level::INFO);
        self
    }
}

/// Flushes metrics and prunes old snapshots when dropped.
pub struct TelemetryGuard {
    telemetry: Arc<Telemetry>,
    retention_days: u32,
}

impl TelemetryGuard {
    pub fn telemetry(&self) -> &Arc<Telemetry> {
        &self.telemetry
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        match self.telemetry.flush() {
            Ok(rows) => tracing::debug!(rows, "metrics flushed"),
            Err(e) => tracing::warn!(error = %e, "metrics flush failed"),
        }
        if let Err(e) = self.telemetry.prune(self.retention_days) {
            tracing::warn!(error = %e, "metrics prune failed");
        }
    }
}

fn filter_directive(config: &TelemetryConfig) -> String {
    let mut filter_str = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter_str
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_telemetry(config: TelemetryConfig, telemetry: Arc<Telemetry>) -> TelemetryGuard {
    let filter_str = filter_directive(&config);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed()
    };

    if let Err(e) = tracing_subscriber::registry().with(fmt_layer).try_init() {
        eprintln!("poster-telemetry: subscriber already installed: {e}");
    }

    TelemetryGuard {
        telemetry,
        retention_days: config.retention_days,
    }
}
