//! The control loop: wait for a slot, generate, publish, record.
//!
//! ```text
//! WAITING ─▶ GENERATING ─▶ PUBLISHING ─▶ RECORDING ─▶ WAITING
//!               │              │             │
//!               └──────────────┴─────────────┴──▶ ERROR_BACKOFF ─▶ WAITING | RECORDING
//! ```
//!
//! Content that failed to publish is held and retried while it is
//! younger than the pipeline's cache TTL. The retry skips the slot check
//! but not the daily quota or quiet hours. A publish whose outcome is
//! unknown is never retried. A post that was published but not fully
//! recorded resumes at the first unfinished recording step.

use std::sync::Arc;
use std::time::Duration;

use poster_core::{Clock, PostRecord};
use poster_llm::ReliablePublisher;
use poster_settings::{MonitorSettings, ScheduleSettings};
use poster_store::{StateStore, StoreError};
use poster_telemetry::Telemetry;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::MonitorError;
use crate::pipeline::{ContentPipeline, GeneratedContent};
use crate::schedule::{SchedulingPolicy, TimeInfo};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Waiting,
    Generating,
    Publishing,
    Recording,
    ErrorBackoff,
}

/// What sent the loop into backoff; selects the delay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffReason {
    NoContent,
    PublishFailed,
    Storage,
}

#[derive(Clone, Debug)]
pub struct MonitorConfig {
    pub max_daily_posts: u32,
    /// Longest single wait in `Waiting`.
    pub poll_interval: Duration,
    pub no_content_backoff: Duration,
    pub publish_failure_backoff: Duration,
    pub storage_backoff: Duration,
    pub publish_timeout: Duration,
    pub store_timeout: Duration,
    pub max_stored_posts: u64,
}

impl MonitorConfig {
    pub fn new(monitor: &MonitorSettings, schedule: &ScheduleSettings) -> Self {
        Self {
            max_daily_posts: schedule.max_daily_posts,
            poll_interval: Duration::from_secs(schedule.poll_interval_secs.max(1)),
            no_content_backoff: Duration::from_secs(monitor.no_content_backoff_secs),
            publish_failure_backoff: Duration::from_secs(monitor.publish_failure_backoff_secs),
            storage_backoff: Duration::from_secs(monitor.storage_backoff_secs),
            publish_timeout: Duration::from_secs(monitor.publish_timeout_secs),
            store_timeout: Duration::from_secs(monitor.store_timeout_secs),
            max_stored_posts: monitor.max_stored_posts,
        }
    }

    fn backoff(&self, reason: BackoffReason) -> Duration {
        match reason {
            BackoffReason::NoContent => self.no_content_backoff,
            BackoffReason::PublishFailed => self.publish_failure_backoff,
            BackoffReason::Storage => self.storage_backoff,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MonitorStatus {
    pub state: LoopState,
    pub time: TimeInfo,
    pub holding_content: bool,
    pub unrecorded_post: Option<String>,
}

/// A published post and which recording steps are done.
#[derive(Debug)]
struct Unrecorded {
    record: PostRecord,
    saved: bool,
    counted: bool,
}

pub struct Monitor {
    schedule: Arc<SchedulingPolicy>,
    pipeline: Arc<ContentPipeline>,
    publisher: Arc<ReliablePublisher>,
    store: Arc<StateStore>,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    telemetry: Arc<Telemetry>,
    state: LoopState,
    backoff: Option<BackoffReason>,
    held: Option<GeneratedContent>,
    unrecorded: Option<Unrecorded>,
}

impl Monitor {
    pub fn new(
        schedule: Arc<SchedulingPolicy>,
        pipeline: Arc<ContentPipeline>,
        publisher: Arc<ReliablePublisher>,
        store: Arc<StateStore>,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            schedule,
            pipeline,
            publisher,
            store,
            clock,
            config,
            telemetry,
            state: LoopState::Waiting,
            backoff: None,
            held: None,
            unrecorded: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state,
            time: self.schedule.time_info(self.clock.now()),
            holding_content: self.held.is_some(),
            unrecorded_post: self.unrecorded.as_ref().map(|u| u.record.id.to_string()),
        }
    }

    /// Run until `cancel` fires. Single failures never end the loop.
    #[instrument(skip_all)]
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(status = ?self.status(), "monitor started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let delay = self.step().await;
            if delay.is_zero() {
                continue;
            }
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        if self.unrecorded.is_some() {
            info!("recording published post before exit");
            self.record().await;
        }
        if let Some(held) = self.held.take() {
            warn!(topic = %held.topic, "dropping unpublished content on exit");
        }
        info!("monitor stopped");
    }

    /// Perform one transition. Returns how long to sleep before the next.
    pub async fn step(&mut self) -> Duration {
        match self.state {
            LoopState::Waiting => self.wait().await,
            LoopState::Generating => self.generate().await,
            LoopState::Publishing => self.publish().await,
            LoopState::Recording => self.record().await,
            LoopState::ErrorBackoff => self.leave_backoff(),
        }
    }

    fn enter_backoff(&mut self, reason: BackoffReason) -> Duration {
        self.telemetry.counter_inc("monitor.backoffs", 1);
        self.state = LoopState::ErrorBackoff;
        self.backoff = Some(reason);
        Duration::ZERO
    }

    fn leave_backoff(&mut self) -> Duration {
        let reason = self.backoff.take().unwrap_or(BackoffReason::NoContent);
        let delay = self.config.backoff(reason);
        self.state = if self.unrecorded.is_some() {
            LoopState::Recording
        } else {
            LoopState::Waiting
        };
        info!(reason = ?reason, delay_secs = delay.as_secs(), "backing off");
        delay
    }

    async fn wait(&mut self) -> Duration {
        let count = match self
            .store_call("get_today_post_count", |s| s.get_today_post_count())
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "could not read today's post count");
                return self.enter_backoff(BackoffReason::Storage);
            }
        };
        let now = self.clock.now();

        if let Some(held) = &self.held {
            if held.age(now) < self.pipeline.cache_ttl() {
                if count >= self.config.max_daily_posts {
                    debug!(count, "holding content until the quota frees up");
                    return self.config.poll_interval;
                }
                if self.schedule.is_quiet(now) {
                    debug!(topic = %held.topic, "holding content through quiet hours");
                    return self.config.poll_interval;
                }
                info!(topic = %held.topic, "retrying publish with held content");
                self.state = LoopState::Publishing;
                return Duration::ZERO;
            }
            info!(topic = %held.topic, "held content expired, will regenerate");
            self.held = None;
        }

        if self
            .schedule
            .should_post(now, count, self.config.max_daily_posts)
        {
            self.state = LoopState::Generating;
            return Duration::ZERO;
        }

        let until = self.schedule.time_until_next(now);
        self.telemetry
            .gauge_set("schedule.next_post_in_secs", until.as_secs_f64());
        let delay = if until.is_zero() {
            self.config.poll_interval
        } else {
            until.min(self.config.poll_interval)
        };
        debug!(count, until_secs = until.as_secs(), delay_secs = delay.as_secs(), "waiting");
        delay
    }

    async fn generate(&mut self) -> Duration {
        match self.pipeline.generate().await {
            Some(content) => {
                self.held = Some(content);
                self.state = LoopState::Publishing;
                Duration::ZERO
            }
            None => self.enter_backoff(BackoffReason::NoContent),
        }
    }

    async fn publish(&mut self) -> Duration {
        let content = match self.held.clone() {
            Some(c) => c,
            None => {
                self.state = LoopState::Waiting;
                return Duration::ZERO;
            }
        };
        let limit = self.config.publish_timeout;
        let result = match tokio::time::timeout(limit, self.publisher.publish(&content.text)).await {
            Ok(r) => r.map_err(MonitorError::from),
            Err(_) => Err(MonitorError::PublishTimeout(limit)),
        };
        match result {
            Ok(id) => {
                info!(post_id = %id, scene = %content.scene, topic = %content.topic, "post published");
                self.pipeline.forget(&content);
                self.held = None;
                let record = PostRecord::published(id, content.text, self.clock.now())
                    .with_scene(content.scene, content.topic);
                self.unrecorded = Some(Unrecorded {
                    record,
                    saved: false,
                    counted: false,
                });
                self.state = LoopState::Recording;
                Duration::ZERO
            }
            Err(e) if e.publish_outcome_unknown() => {
                self.telemetry.counter_inc("monitor.publish_failures", 1);
                self.telemetry.counter_inc("monitor.publish_unconfirmed", 1);
                error!(error = %e, topic = %content.topic, "publish outcome unknown, dropping content");
                self.pipeline.forget(&content);
                self.held = None;
                self.enter_backoff(BackoffReason::PublishFailed)
            }
            Err(e) => {
                self.telemetry.counter_inc("monitor.publish_failures", 1);
                warn!(error = %e, "publish failed, content kept for retry");
                self.enter_backoff(BackoffReason::PublishFailed)
            }
        }
    }

    async fn record(&mut self) -> Duration {
        let mut pending = match self.unrecorded.take() {
            Some(p) => p,
            None => {
                self.state = LoopState::Waiting;
                return Duration::ZERO;
            }
        };

        if !pending.saved {
            let record = pending.record.clone();
            if let Err(e) = self.store_call("save_post", move |s| s.save_post(&record)).await {
                error!(post_id = %pending.record.id, error = %e, "could not save published post");
                self.unrecorded = Some(pending);
                return self.enter_backoff(BackoffReason::Storage);
            }
            pending.saved = true;
        }

        let mut today = None;
        if !pending.counted {
            let record = pending.record.clone();
            match self.store_call("count_post", move |s| s.count_post(&record)).await {
                Ok(n) => today = Some(n),
                Err(e) => {
                    error!(post_id = %pending.record.id, error = %e, "could not count published post");
                    self.unrecorded = Some(pending);
                    return self.enter_backoff(BackoffReason::Storage);
                }
            }
            pending.counted = true;
        }

        let cap = self.config.max_stored_posts;
        match self.store_call("enforce_post_cap", move |s| s.enforce_post_cap(cap)).await {
            Ok(0) => {}
            Ok(n) => info!(deleted = n, cap, "pruned old post records"),
            Err(e) => warn!(error = %e, "post cap not enforced"),
        }

        self.telemetry.counter_inc("monitor.posts_recorded", 1);
        info!(
            post_id = %pending.record.id,
            today = ?today,
            next = ?self.schedule.scheduled(),
            "post recorded"
        );
        self.state = LoopState::Waiting;
        Duration::ZERO
    }

    /// Run a store operation off the async threads, bounded by the store timeout.
    async fn store_call<T, F>(&self, op: &'static str, f: F) -> Result<T, MonitorError>
    where
        T: Send + 'static,
        F: FnOnce(&StateStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.store.clone();
        let limit = self.config.store_timeout;
        match tokio::time::timeout(limit, tokio::task::spawn_blocking(move || f(&*store))).await {
            Ok(Ok(r)) => r.map_err(|source| MonitorError::Store { op, source }),
            Ok(Err(join)) => Err(MonitorError::StoreTask {
                op,
                detail: join.to_string(),
            }),
            Err(_) => Err(MonitorError::StoreTimeout { op, after: limit }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use chrono::{DateTime, TimeZone, Utc};
    use poster_core::{ExternalError, ManualClock, Publisher, TextGenerator};
    use poster_llm::mock::{MockGenerator, MockPublisher};
    use poster_llm::{GuardConfig, ReliableGenerator};
    use poster_settings::{CacheSettings, PipelineSettings};
    use poster_store::{CreatedFilter, Database, Document, DocumentStore, SqliteDocumentStore};
    use serde_json::Value;

    const GOOD: &str =
        "今天去了一家新開的咖啡廳，拿鐵的拉花超級漂亮，店裡還有一隻很親人的貓咪陪我看書✨ 你們覺得呢？";

    /// Document store whose writes or reads can be switched off.
    struct FlakyDocs {
        inner: SqliteDocumentStore,
        fail_increment: AtomicBool,
        fail_counter: AtomicBool,
        /// The next counted increment stalls this long before it commits.
        stall_increment: Mutex<Option<Duration>>,
    }

    fn broken(op: &'static str) -> StoreError {
        StoreError::Write {
            op,
            detail: "disk I/O error".into(),
        }
    }

    impl DocumentStore for FlakyDocs {
        fn upsert(&self, collection: &str, key: &str, body: &Value, created_at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.upsert(collection, key, body, created_at)
        }
        fn find(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
            self.inner.find(collection, key)
        }
        fn count(&self, collection: &str, filter: CreatedFilter) -> Result<u64, StoreError> {
            self.inner.count(collection, filter)
        }
        fn recent(&self, collection: &str, limit: usize) -> Result<Vec<Document>, StoreError> {
            self.inner.recent(collection, limit)
        }
        fn delete_oldest(&self, collection: &str, n: usize) -> Result<Vec<String>, StoreError> {
            self.inner.delete_oldest(collection, n)
        }
        fn increment(&self, counter: &str, by: i64) -> Result<i64, StoreError> {
            if self.fail_increment.load(Ordering::SeqCst) {
                return Err(broken("increment"));
            }
            self.inner.increment(counter, by)
        }
        fn increment_once(&self, counter: &str, token: &str, by: i64) -> Result<i64, StoreError> {
            if self.fail_increment.load(Ordering::SeqCst) {
                return Err(broken("increment_once"));
            }
            if let Some(stall) = self.stall_increment.lock().take() {
                std::thread::sleep(stall);
            }
            self.inner.increment_once(counter, token, by)
        }
        fn counter(&self, counter: &str) -> Result<i64, StoreError> {
            if self.fail_counter.load(Ordering::SeqCst) {
                return Err(StoreError::Read {
                    op: "counter",
                    detail: "database is locked".into(),
                });
            }
            self.inner.counter(counter)
        }
    }

    struct Fixture {
        monitor: Monitor,
        clock: Arc<ManualClock>,
        generator: Arc<MockGenerator>,
        publisher: Arc<MockPublisher>,
        store: Arc<StateStore>,
        docs: Arc<FlakyDocs>,
        schedule: Arc<SchedulingPolicy>,
    }

    fn local(hour: u32) -> DateTime<Utc> {
        chrono_tz::Asia::Taipei
            .with_ymd_and_hms(2024, 6, 1, hour, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn fixture_with(generator: MockGenerator, max_daily_posts: u32) -> Fixture {
        let telemetry = Arc::new(Telemetry::new());
        let clock = Arc::new(ManualClock::new(local(10)));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let schedule_settings = ScheduleSettings {
            max_daily_posts,
            ..Default::default()
        };
        let schedule = Arc::new(SchedulingPolicy::new(&schedule_settings).unwrap().with_seed(3));

        let docs = Arc::new(FlakyDocs {
            inner: SqliteDocumentStore::new(Database::in_memory().unwrap()),
            fail_increment: AtomicBool::new(false),
            fail_counter: AtomicBool::new(false),
            stall_increment: Mutex::new(None),
        });
        let store = Arc::new(StateStore::new(
            docs.clone(),
            dyn_clock.clone(),
            schedule.timezone(),
            &CacheSettings {
                count_ttl_secs: 0,
                ..Default::default()
            },
            telemetry.clone(),
        ));
        store.seed_personality_defaults().unwrap();

        let generator = Arc::new(generator);
        let gen_dyn: Arc<dyn TextGenerator> = generator.clone();
        let reliable_gen = Arc::new(ReliableGenerator::new(gen_dyn, GuardConfig::default(), telemetry.clone()));
        let pipeline = Arc::new(
            ContentPipeline::new(
                reliable_gen,
                store.clone(),
                dyn_clock.clone(),
                schedule.timezone(),
                PipelineSettings::default(),
                telemetry.clone(),
            )
            .with_seed(5),
        );

        let publisher = Arc::new(MockPublisher::new());
        let pub_dyn: Arc<dyn Publisher> = publisher.clone();
        let reliable_pub = Arc::new(ReliablePublisher::new(pub_dyn, GuardConfig::default(), telemetry.clone()));

        let monitor = Monitor::new(
            schedule.clone(),
            pipeline,
            reliable_pub,
            store.clone(),
            dyn_clock,
            MonitorConfig::new(&MonitorSettings::default(), &schedule_settings),
            telemetry,
        );
        Fixture {
            monitor,
            clock,
            generator,
            publisher,
            store,
            docs,
            schedule,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockGenerator::always(GOOD), 40)
    }

    /// Step until the loop asks to sleep; returns the states passed through.
    async fn until_sleep(m: &mut Monitor) -> (Vec<LoopState>, Duration) {
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(m.state());
            let delay = m.step().await;
            if !delay.is_zero() {
                return (seen, delay);
            }
        }
        panic!("loop never slept: {seen:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_posts_once() {
        let mut f = fixture();
        let (states, delay) = until_sleep(&mut f.monitor).await;
        assert_eq!(
            states,
            vec![
                LoopState::Waiting,
                LoopState::Generating,
                LoopState::Publishing,
                LoopState::Recording,
                LoopState::Waiting,
            ]
        );
        assert_eq!(f.publisher.published(), vec![GOOD.to_string()]);
        assert_eq!(f.store.get_today_post_count().unwrap(), 1);
        assert_eq!(f.store.total_posts().unwrap(), 1);
        assert!(delay <= Duration::from_secs(300));
        assert!(f.schedule.scheduled().unwrap() > local(10));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_next_slot() {
        let mut f = fixture();
        until_sleep(&mut f.monitor).await;
        let next = f.schedule.scheduled().unwrap();

        f.clock.set(next - chrono::Duration::seconds(60));
        assert_eq!(f.monitor.step().await, Duration::from_secs(60));
        assert_eq!(f.generator.call_count(), 1);

        f.clock.set(next);
        until_sleep(&mut f.monitor).await;
        assert_eq!(f.store.get_today_post_count().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_polls_without_generating() {
        let mut f = fixture_with(MockGenerator::always(GOOD), 1);
        until_sleep(&mut f.monitor).await;
        f.clock.set(f.schedule.scheduled().unwrap() + chrono::Duration::minutes(1));
        let (states, delay) = until_sleep(&mut f.monitor).await;
        assert_eq!(states, vec![LoopState::Waiting]);
        assert_eq!(delay, Duration::from_secs(300));
        assert_eq!(f.generator.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_content_backs_off() {
        let mut f = fixture_with(MockGenerator::always("今天的天氣讓我好想"), 40);
        let (states, delay) = until_sleep(&mut f.monitor).await;
        assert_eq!(
            states,
            vec![LoopState::Waiting, LoopState::Generating, LoopState::ErrorBackoff]
        );
        assert_eq!(delay, Duration::from_secs(300));
        assert_eq!(f.monitor.state(), LoopState::Waiting);
        assert!(f.publisher.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_failure_reuses_content() {
        let mut f = fixture();
        f.publisher
            .fail_next(1, ExternalError::BadRequest("container rejected".into()));
        let (states, delay) = until_sleep(&mut f.monitor).await;
        assert_eq!(states.last(), Some(&LoopState::ErrorBackoff));
        assert_eq!(delay, Duration::from_secs(600));
        assert!(f.monitor.status().holding_content);

        // retried before the next slot, without a new generation
        f.clock.advance(chrono::Duration::minutes(10));
        let (states, _) = until_sleep(&mut f.monitor).await;
        assert_eq!(
            states,
            vec![
                LoopState::Waiting,
                LoopState::Publishing,
                LoopState::Recording,
                LoopState::Waiting,
            ]
        );
        assert_eq!(f.generator.call_count(), 1);
        assert_eq!(f.publisher.published().len(), 1);
        assert_eq!(f.store.get_today_post_count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_held_content_is_regenerated() {
        let mut f = fixture();
        f.publisher
            .fail_next(1, ExternalError::BadRequest("container rejected".into()));
        until_sleep(&mut f.monitor).await;

        f.clock.advance(chrono::Duration::hours(25));
        tokio::time::advance(Duration::from_secs(25 * 3600)).await;
        let (states, _) = until_sleep(&mut f.monitor).await;
        assert_eq!(states[1], LoopState::Generating);
        assert_eq!(f.generator.call_count(), 2);
        assert_eq!(f.publisher.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recording_resumes_without_double_count() {
        let mut f = fixture();
        f.docs.fail_increment.store(true, Ordering::SeqCst);
        let (states, delay) = until_sleep(&mut f.monitor).await;
        assert_eq!(states.last(), Some(&LoopState::ErrorBackoff));
        assert_eq!(delay, Duration::from_secs(300));
        assert_eq!(f.monitor.state(), LoopState::Recording);
        assert_eq!(f.store.total_posts().unwrap(), 1);

        f.docs.fail_increment.store(false, Ordering::SeqCst);
        let (states, _) = until_sleep(&mut f.monitor).await;
        assert_eq!(states, vec![LoopState::Recording, LoopState::Waiting]);
        assert_eq!(f.store.get_today_post_count().unwrap(), 1);
        assert_eq!(f.store.total_posts().unwrap(), 1);
        assert_eq!(f.publisher.call_count(), 1);
    }

    #[tokio::test]
    async fn late_count_after_store_timeout_is_not_repeated() {
        let mut f = fixture();
        f.monitor.config.store_timeout = Duration::from_millis(50);
        *f.docs.stall_increment.lock() = Some(Duration::from_millis(300));
        let (states, _) = until_sleep(&mut f.monitor).await;
        assert_eq!(states.last(), Some(&LoopState::ErrorBackoff));
        assert_eq!(f.monitor.state(), LoopState::Recording);

        // the timed-out write lands in the background
        tokio::time::sleep(Duration::from_millis(400)).await;
        let (states, _) = until_sleep(&mut f.monitor).await;
        assert_eq!(states, vec![LoopState::Recording, LoopState::Waiting]);
        assert_eq!(f.publisher.published().len(), 1);
        assert_eq!(f.store.get_today_post_count().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn held_content_waits_out_quiet_hours() {
        let mut f = fixture();
        f.clock.set(local(22) + chrono::Duration::minutes(50));
        f.publisher
            .fail_next(1, ExternalError::BadRequest("container rejected".into()));
        let (states, _) = until_sleep(&mut f.monitor).await;
        assert_eq!(states.last(), Some(&LoopState::ErrorBackoff));

        f.clock.advance(chrono::Duration::minutes(20));
        let (states, delay) = until_sleep(&mut f.monitor).await;
        assert_eq!(states, vec![LoopState::Waiting]);
        assert_eq!(delay, Duration::from_secs(300));
        assert!(f.monitor.status().holding_content);
        assert!(f.publisher.published().is_empty());

        // the held text goes out once quiet hours end, without a new generation
        f.clock.set(local(7) + chrono::Duration::days(1));
        let (states, _) = until_sleep(&mut f.monitor).await;
        assert_eq!(&states[..3], &[LoopState::Waiting, LoopState::Publishing, LoopState::Recording]);
        assert_eq!(f.publisher.published()[0], GOOD);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_publish_is_dropped_not_reposted() {
        let mut f = fixture();
        f.publisher
            .fail_next(1, ExternalError::Unconfirmed("publish of container c1".into()));
        let (states, delay) = until_sleep(&mut f.monitor).await;
        assert_eq!(states.last(), Some(&LoopState::ErrorBackoff));
        assert_eq!(delay, Duration::from_secs(600));
        assert!(!f.monitor.status().holding_content);
        assert_eq!(f.publisher.call_count(), 1);

        // nothing is retried before the next slot
        let next = f.schedule.scheduled().unwrap();
        f.clock.set(next - chrono::Duration::seconds(60));
        let (states, _) = until_sleep(&mut f.monitor).await;
        assert_eq!(states, vec![LoopState::Waiting]);
        assert_eq!(f.publisher.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_count_backs_off() {
        let mut f = fixture();
        f.docs.fail_counter.store(true, Ordering::SeqCst);
        let (states, delay) = until_sleep(&mut f.monitor).await;
        assert_eq!(states, vec![LoopState::Waiting, LoopState::ErrorBackoff]);
        assert_eq!(delay, Duration::from_secs(300));
        assert_eq!(f.generator.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_exits_on_cancel() {
        let mut f = fixture();
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            stopper.cancel();
        });
        tokio::time::timeout(Duration::from_secs(3600), f.monitor.run(cancel))
            .await
            .expect("monitor should stop within one poll interval");
        assert_eq!(f.publisher.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_schedule() {
        let mut f = fixture();
        until_sleep(&mut f.monitor).await;
        let status = f.monitor.status();
        assert_eq!(status.state, LoopState::Waiting);
        assert!(!status.holding_content);
        assert!(status.unrecorded_post.is_none());
        assert_eq!(status.time.timezone, "Asia/Taipei");
        assert!(status.time.next_post_time.is_some());
    }
}
