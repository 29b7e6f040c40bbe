use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::timing::{OperationHistory, OperationStats, OperationTimer};

/// Type of metric.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Counter,
    Gauge,
    /// Persisted as the rolling p50 in milliseconds.
    Timing,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Timing => "timing",
        }
    }
}

/// A persisted metric value.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub id: i64,
    pub timestamp: String,
    pub name: String,
    pub value: f64,
    pub metric_type: MetricType,
}

/// Monotonically increasing.
struct Counter {
    value: AtomicU64,
}

impl Counter {
    fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }
    fn increment(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }
    fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

struct Gauge {
    // f64 bits
    value: AtomicI64,
}

impl Gauge {
    fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }
    fn set(&self, v: f64) {
        self.value.store(v.to_bits() as i64, Ordering::Relaxed);
    }
    fn get(&self) -> f64 {
        f64::from_bits(self.value.load(Ordering::Relaxed) as u64)
    }
}

/// Process-wide metrics: counters, gauges, and per-operation timing
/// history. Constructed once at startup and shared via `Arc`.
///
/// Snapshots go to a `metrics_snapshots` SQLite table when a database is
/// attached; otherwise `flush` is a no-op.
pub struct Telemetry {
    counters: RwLock<HashMap<String, Counter>>,
    gauges: RwLock<HashMap<String, Gauge>>,
    operations: RwLock<HashMap<String, Mutex<OperationHistory>>>,
    history_len: usize,
    db: Option<Mutex<Connection>>,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub const DEFAULT_HISTORY: usize = 100;

    /// In-memory only.
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            history_len: Self::DEFAULT_HISTORY,
            db: None,
        }
    }

    /// Attach a SQLite database for snapshots.
    pub fn with_db(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn with_connection(conn: Connection) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS metrics_snapshots (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 name TEXT NOT NULL,
                 value REAL NOT NULL,
                 metric_type TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_metrics_name ON metrics_snapshots(name, timestamp);",
        )?;
        Ok(Self {
            db: Some(Mutex::new(conn)),
            ..Self::new()
        })
    }

    /// Override the rolling history length (applies to operations first
    /// seen after the call).
    pub fn with_history_len(mut self, len: usize) -> Self {
        self.history_len = len.max(1);
        self
    }

    pub fn counter_inc(&self, name: &str, n: u64) {
        let counters = self.counters.read();
        if let Some(c) = counters.get(name) {
            c.increment(n);
            return;
        }
        drop(counters);
        let mut counters = self.counters.write();
        counters.entry(name.to_string()).or_insert_with(Counter::new).increment(n);
    }

    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters.read().get(name).map_or(0, Counter::get)
    }

    pub fn gauge_set(&self, name: &str, value: f64) {
        let gauges = self.gauges.read();
        if let Some(g) = gauges.get(name) {
            g.set(value);
            return;
        }
        drop(gauges);
        let mut gauges = self.gauges.write();
        gauges.entry(name.to_string()).or_insert_with(Gauge::new).set(value);
    }

    pub fn gauge_get(&self, name: &str) -> f64 {
        self.gauges.read().get(name).map_or(0.0, Gauge::get)
    }

    /// Begin timing `name`. Call [`OperationTimer::stop`] to record.
    pub fn start_operation(&self, name: &str) -> OperationTimer<'_> {
        OperationTimer::new(self, name)
    }

    /// Time a future under `name`, recording its duration whatever it returns.
    pub async fn track<F, T>(&self, name: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let timer = self.start_operation(name);
        let out = fut.await;
        timer.stop();
        out
    }

    pub fn record_duration(&self, name: &str, elapsed: Duration) {
        let ops = self.operations.read();
        if let Some(h) = ops.get(name) {
            h.lock().push(elapsed);
            return;
        }
        drop(ops);
        let mut ops = self.operations.write();
        ops.entry(name.to_string())
            .or_insert_with(|| Mutex::new(OperationHistory::new(self.history_len)))
            .lock()
            .push(elapsed);
    }

    pub fn operation_stats(&self, name: &str) -> Option<OperationStats> {
        self.operations.read().get(name).and_then(|h| h.lock().stats())
    }

    pub fn operation_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.operations.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Persist the current value of every metric. Returns the row count.
    pub fn flush(&self) -> Result<usize, rusqlite::Error> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let now = Utc::now().to_rfc3339();
        let mut rows: Vec<(String, f64, MetricType)> = Vec::new();
        for (name, c) in self.counters.read().iter() {
            rows.push((name.clone(), c.get() as f64, MetricType::Counter));
        }
        for (name, g) in self.gauges.read().iter() {
            rows.push((name.clone(), g.get(), MetricType::Gauge));
        }
        for (name, h) in self.operations.read().iter() {
            if let Some(stats) = h.lock().stats() {
                rows.push((name.clone(), stats.p50.as_secs_f64() * 1000.0, MetricType::Timing));
            }
        }

        let mut conn = db.lock();
        let tx = conn.transaction()?;
        for (name, value, kind) in &rows {
            tx.execute(
                "INSERT INTO metrics_snapshots (timestamp, name, value, metric_type)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![now, name, value, kind.as_str()],
            )?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Most recent snapshots for `name`, newest first.
    pub fn history(&self, name: &str, limit: u32) -> Result<Vec<MetricsSnapshot>, rusqlite::Error> {
        let Some(db) = &self.db else {
            return Ok(Vec::new());
        };
        let db = db.lock();
        let mut stmt = db.prepare(
            "SELECT id, timestamp, name, value, metric_type FROM metrics_snapshots
             WHERE name = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![name, limit], |row| {
            let mt: String = row.get(4)?;
            let metric_type = match mt.as_str() {
                "gauge" => MetricType::Gauge,
                "timing" => MetricType::Timing,
                _ => MetricType::Counter,
            };
            Ok(MetricsSnapshot {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                name: row.get(2)?,
                value: row.get(3)?,
                metric_type,
            })
        })?;
        rows.collect()
    }

    /// Delete snapshots older than `retention_days`.
    pub fn prune(&self, retention_days: u32) -> Result<usize, rusqlite::Error> {
        let Some(db) = &self.db else {
            return Ok(0);
        };
        let cutoff = Utc::now()
            .checked_sub_signed(chrono::Duration::days(i64::from(retention_days)))
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        db.lock().execute(
            "DELETE FROM metrics_snapshots WHERE timestamp <= ?1",
            rusqlite::params![cutoff],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_memory_db() -> Telemetry {
        Telemetry::with_connection(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn counter_basic() {
        let t = Telemetry::new();
        t.counter_inc("publisher.posts", 1);
        t.counter_inc("publisher.posts", 2);
        assert_eq!(t.counter_get("publisher.posts"), 3);
        assert_eq!(t.counter_get("publisher.errors"), 0);
    }

    #[test]
    fn gauge_overwrites() {
        let t = Telemetry::new();
        t.gauge_set("store.today_count", 4.0);
        t.gauge_set("store.today_count", 5.0);
        assert_eq!(t.gauge_get("store.today_count"), 5.0);
        assert_eq!(t.gauge_get("missing"), 0.0);
    }

    #[test]
    fn record_duration_builds_stats() {
        let t = Telemetry::new();
        for ms in [10, 20, 30] {
            t.record_duration("generate", Duration::from_millis(ms));
        }
        let stats = t.operation_stats("generate").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(30));
        assert!(t.operation_stats("publish").is_none());
    }

    #[test]
    fn history_is_bounded() {
        let t = Telemetry::new().with_history_len(5);
        for ms in 0..20 {
            t.record_duration("op", Duration::from_millis(ms));
        }
        let stats = t.operation_stats("op").unwrap();
        assert_eq!(stats.count, 5);
        assert_eq!(stats.min, Duration::from_millis(15));
    }

    #[tokio::test(start_paused = true)]
    async fn track_measures_future() {
        let t = Telemetry::new();
        let out = t
            .track("sleepy", async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                7
            })
            .await;
        assert_eq!(out, 7);
        let stats = t.operation_stats("sleepy").unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.max >= Duration::from_secs(2));
    }

    #[test]
    fn flush_without_db_is_noop() {
        let t = Telemetry::new();
        t.counter_inc("x", 1);
        assert_eq!(t.flush().unwrap(), 0);
        assert!(t.history("x", 10).unwrap().is_empty());
    }

    #[test]
    fn flush_persists_all_kinds() {
        let t = with_memory_db();
        t.counter_inc("generator.requests", 42);
        t.gauge_set("schedule.next_post_in_secs", 900.0);
        t.record_duration("pipeline.generate", Duration::from_millis(250));

        assert_eq!(t.flush().unwrap(), 3);

        let rows = t.history("generator.requests", 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, 42.0);
        assert_eq!(rows[0].metric_type, MetricType::Counter);

        let timing = t.history("pipeline.generate", 10).unwrap();
        assert_eq!(timing[0].metric_type, MetricType::Timing);
        assert_eq!(timing[0].value, 250.0);
    }

    #[test]
    fn prune_removes_old_snapshots() {
        let t = with_memory_db();
        t.counter_inc("c", 1);
        t.flush().unwrap();
        assert_eq!(t.prune(0).unwrap(), 1);
        assert!(t.history("c", 10).unwrap().is_empty());
    }

    #[test]
    fn file_backed_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("metrics.db");
        let t = Telemetry::with_db(&path).unwrap();
        t.counter_inc("c", 1);
        assert_eq!(t.flush().unwrap(), 1);
        assert!(path.exists());
    }

    #[test]
    fn concurrent_counter_increments() {
        use std::sync::Arc;
        use std::thread;

        let t = Arc::new(Telemetry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = t.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        t.counter_inc("concurrent", 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.counter_get("concurrent"), 4000);
    }
}
