use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use poster_core::{Clock, ContextKey, PersonalityMemory, PostId, PostRecord};
use poster_settings::CacheSettings;
use poster_telemetry::Telemetry;
use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{LruCache, TtlCache};
use crate::document::{CreatedFilter, DocumentStore};
use crate::error::StoreError;

const POSTS: &str = "posts";
const PERSONALITY: &str = "personality";

/// Daily counters are few; the TTL cache only needs room for today and
/// a day either side.
const COUNT_CACHE_SIZE: usize = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub counts_cached: usize,
    pub posts_cached: usize,
    pub personalities_cached: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cached façade over a [`DocumentStore`] for daily counters, post records
/// and personality memory.
///
/// Each write goes to the backing store and updates its cache while the
/// cache lock is held, so a reader never sees the cache behind the store.
/// Backing-store errors are returned, never swallowed.
pub struct StateStore {
    docs: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    telemetry: Arc<Telemetry>,
    counts: Mutex<TtlCache<String, u32>>,
    posts: Mutex<LruCache<PostId, PostRecord>>,
    personalities: Mutex<LruCache<ContextKey, PersonalityMemory>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl StateStore {
    pub fn new(
        docs: Arc<dyn DocumentStore>,
        clock: Arc<dyn Clock>,
        tz: Tz,
        settings: &CacheSettings,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            docs,
            clock,
            tz,
            telemetry,
            counts: Mutex::new(TtlCache::new(
                Duration::from_secs(settings.count_ttl_secs),
                COUNT_CACHE_SIZE,
            )),
            posts: Mutex::new(LruCache::new(settings.post_cache_size)),
            personalities: Mutex::new(
                LruCache::new(settings.personality_cache_size)
                    .with_ttl(Duration::from_secs(settings.personality_ttl_secs)),
            ),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn hit(&self, what: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.telemetry.counter_inc("store.cache_hits", 1);
        debug!(cache = what, "cache hit");
    }

    fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.telemetry.counter_inc("store.cache_misses", 1);
    }

    /// Counter key for the local calendar day containing `at`.
    pub fn date_key(&self, at: DateTime<Utc>) -> String {
        format!("posts:{}", at.with_timezone(&self.tz).format("%Y-%m-%d"))
    }

    // ── Daily counter ─────────────────────────────────────────────────

    pub fn get_today_post_count(&self) -> Result<u32, StoreError> {
        let key = self.date_key(self.clock.now());
        let mut counts = self.counts.lock();
        if let Some(n) = counts.get(&key) {
            self.hit("counts");
            return Ok(n);
        }
        self.miss();
        let n = clamp_count(self.docs.counter(&key)?);
        counts.insert(key, n);
        self.telemetry.gauge_set("store.today_count", f64::from(n));
        Ok(n)
    }

    /// Add one to today's counter. Returns the new count.
    pub fn increment_post_count(&self) -> Result<u32, StoreError> {
        let key = self.date_key(self.clock.now());
        let mut counts = self.counts.lock();
        match self.docs.increment(&key, 1) {
            Ok(n) => {
                let n = clamp_count(n);
                counts.insert(key, n);
                self.telemetry.gauge_set("store.today_count", f64::from(n));
                Ok(n)
            }
            Err(e) => {
                // the write may or may not have landed
                counts.remove(&key);
                Err(e)
            }
        }
    }

    /// Count a published post against the day it was created on. Counting
    /// the same post again returns the current value without adding, so a
    /// retry after an ambiguous failure cannot double count.
    pub fn count_post(&self, record: &PostRecord) -> Result<u32, StoreError> {
        let key = self.date_key(record.created_at);
        let mut counts = self.counts.lock();
        match self.docs.increment_once(&key, record.id.as_str(), 1) {
            Ok(n) => {
                let n = clamp_count(n);
                counts.insert(key, n);
                self.telemetry.gauge_set("store.today_count", f64::from(n));
                Ok(n)
            }
            Err(e) => {
                counts.remove(&key);
                Err(e)
            }
        }
    }

    // ── Posts ─────────────────────────────────────────────────────────

    /// Upsert by post id; saving the same id again replaces the record.
    pub fn save_post(&self, record: &PostRecord) -> Result<(), StoreError> {
        let body = serde_json::to_value(record)?;
        let mut posts = self.posts.lock();
        self.docs
            .upsert(POSTS, record.id.as_str(), &body, record.created_at)?;
        posts.insert(record.id.clone(), record.clone());
        Ok(())
    }

    pub fn get_post(&self, id: &PostId) -> Result<Option<PostRecord>, StoreError> {
        let mut posts = self.posts.lock();
        if let Some(p) = posts.get(id) {
            self.hit("posts");
            return Ok(Some(p));
        }
        self.miss();
        let Some(doc) = self.docs.find(POSTS, id.as_str())? else {
            return Ok(None);
        };
        let record: PostRecord = serde_json::from_value(doc.body)?;
        posts.insert(id.clone(), record.clone());
        Ok(Some(record))
    }

    /// Newest first. Read straight from the backing store.
    pub fn recent_posts(&self, limit: usize) -> Result<Vec<PostRecord>, StoreError> {
        self.docs
            .recent(POSTS, limit)?
            .into_iter()
            .map(|doc| serde_json::from_value(doc.body).map_err(StoreError::from))
            .collect()
    }

    /// Posts created in `[start, end)`.
    pub fn count_posts_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<u64, StoreError> {
        self.docs.count(POSTS, CreatedFilter::between(start, end))
    }

    pub fn total_posts(&self) -> Result<u64, StoreError> {
        self.docs.count(POSTS, CreatedFilter::default())
    }

    /// Delete the `n` oldest posts and evict them from the cache.
    pub fn delete_oldest_records(&self, n: usize) -> Result<usize, StoreError> {
        let mut posts = self.posts.lock();
        let deleted = self.docs.delete_oldest(POSTS, n)?;
        for key in &deleted {
            posts.remove(&PostId::from_raw(key.as_str()));
        }
        if !deleted.is_empty() {
            info!(deleted = deleted.len(), "deleted oldest post records");
        }
        Ok(deleted.len())
    }

    /// Trim stored posts down to `max`. Returns how many were deleted.
    pub fn enforce_post_cap(&self, max: u64) -> Result<usize, StoreError> {
        let total = self.total_posts()?;
        if total <= max {
            return Ok(0);
        }
        let excess = usize::try_from(total - max).unwrap_or(usize::MAX);
        self.delete_oldest_records(excess)
    }

    // ── Personality memory ────────────────────────────────────────────

    /// Cached read. `None` when no record exists for `key`.
    pub fn get_personality_memory(&self, key: ContextKey) -> Result<Option<PersonalityMemory>, StoreError> {
        let mut cache = self.personalities.lock();
        if let Some(m) = cache.get(&key) {
            self.hit("personality");
            return Ok(Some(m));
        }
        self.miss();
        let Some(doc) = self.docs.find(PERSONALITY, key.as_str())? else {
            return Ok(None);
        };
        let memory: PersonalityMemory = serde_json::from_value(doc.body)?;
        cache.insert(key, memory.clone());
        Ok(Some(memory))
    }

    /// Upsert keyed by context; at most one record per key.
    pub fn save_personality_memory(&self, key: ContextKey, memory: &PersonalityMemory) -> Result<(), StoreError> {
        let mut record = memory.clone();
        record.context = key;
        let body = serde_json::to_value(&record)?;
        let mut cache = self.personalities.lock();
        self.docs
            .upsert(PERSONALITY, key.as_str(), &body, record.updated_at)?;
        cache.insert(key, record);
        Ok(())
    }

    /// Read the record for `key`, synthesizing and persisting the default
    /// if there is none.
    pub fn get_or_create_personality_memory(&self, key: ContextKey) -> Result<PersonalityMemory, StoreError> {
        if let Some(m) = self.get_personality_memory(key)? {
            return Ok(m);
        }
        let memory = PersonalityMemory::default_for(key, self.clock.now());
        self.save_personality_memory(key, &memory)?;
        info!(context = %key, "created default personality memory");
        Ok(memory)
    }

    /// Deep-merge `patch` into the traits for `key` and save the result.
    pub fn merge_personality_memory(&self, key: ContextKey, patch: &Value) -> Result<PersonalityMemory, StoreError> {
        let current = self.get_or_create_personality_memory(key)?;
        let merged = current.merged(patch, self.clock.now())?;
        self.save_personality_memory(key, &merged)?;
        Ok(merged)
    }

    /// Make sure every scene has a record. Returns how many were created.
    pub fn seed_personality_defaults(&self) -> Result<usize, StoreError> {
        let mut created = 0;
        for key in ContextKey::ALL {
            if self.get_personality_memory(key)?.is_none() {
                self.get_or_create_personality_memory(key)?;
                created += 1;
            }
        }
        Ok(created)
    }

    // ── Cache management ──────────────────────────────────────────────

    pub fn clear_caches(&self) {
        self.counts.lock().clear();
        self.posts.lock().clear();
        self.personalities.lock().clear();
        debug!("state caches cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            counts_cached: self.counts.lock().len(),
            posts_cached: self.posts.lock().len(),
            personalities_cached: self.personalities.lock().len(),
        }
    }
}

fn clamp_count(n: i64) -> u32 {
    u32::try_from(n.max(0)).unwrap_or(u32::MAX)
}
