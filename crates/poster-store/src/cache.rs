use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use tokio::time::Instant;

fn bounded(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

#[derive(Debug)]
struct Stamped<V> {
    value: V,
    inserted: Instant,
}

impl<V> Stamped<V> {
    fn new(value: V) -> Self {
        Self {
            value,
            inserted: Instant::now(),
        }
    }

    fn expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.inserted) >= ttl
    }
}

/// Capacity-bounded map whose entries expire `ttl` after insertion.
///
/// Reads do not reorder entries, so the LRU tail is always the oldest
/// insertion. When full, expired entries are purged first; if none were,
/// the entry closest to expiry goes.
#[derive(Debug)]
pub struct TtlCache<K: Hash + Eq, V> {
    ttl: Duration,
    entries: lru::LruCache<K, Stamped<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            entries: lru::LruCache::new(bounded(capacity)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        self.get_with_age(key).map(|(value, _)| value)
    }

    /// Like [`get`](Self::get), also returning the entry's age.
    pub fn get_with_age(&mut self, key: &K) -> Option<(V, Duration)> {
        let now = Instant::now();
        let entry = self.entries.peek(key)?;
        if entry.expired(self.ttl, now) {
            self.entries.pop(key);
            return None;
        }
        Some((entry.value.clone(), now.duration_since(entry.inserted)))
    }

    pub fn insert(&mut self, key: K, value: V) {
        // a re-insert restarts the entry's clock, so it must also move to the front
        self.entries.pop(&key);
        if self.entries.len() >= self.entries.cap().get() {
            self.purge_expired();
        }
        self.entries.push(key, Stamped::new(value));
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|e| e.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Drop every expired entry; returns how many went.
    pub fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        while let Some((_, oldest)) = self.entries.peek_lru() {
            if !oldest.expired(self.ttl, now) {
                break;
            }
            self.entries.pop_lru();
            purged += 1;
        }
        purged
    }

    /// Entries stored, expired ones included until next touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Least-recently-used map with a fixed capacity and an optional TTL.
///
/// Both `get` and `insert` count as a use. Inserting a new key into a full
/// cache evicts exactly the least recently used entry.
#[derive(Debug)]
pub struct LruCache<K: Hash + Eq, V> {
    ttl: Option<Duration>,
    entries: lru::LruCache<K, Stamped<V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            ttl: None,
            entries: lru::LruCache::new(bounded(capacity)),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let now = Instant::now();
        let expired = match (self.entries.peek(key), self.ttl) {
            (None, _) => return None,
            (Some(e), Some(ttl)) => e.expired(ttl, now),
            (Some(_), None) => false,
        };
        if expired {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|e| e.value.clone())
    }

    /// Evicted key, if inserting pushed one out.
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        match self.entries.push(key.clone(), Stamped::new(value)) {
            Some((old, _)) if old != key => Some(old),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.pop(key).map(|e| e.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ttl_entry_live_before_expiry() {
        let mut c = TtlCache::new(Duration::from_secs(60), 10);
        c.insert("k", 1);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(c.get(&"k"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_entry_gone_at_expiry() {
        let mut c = TtlCache::new(Duration::from_secs(60), 10);
        c.insert("k", 1);
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(c.get(&"k"), None);
        assert!(c.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_reinsert_restarts_clock() {
        let mut c = TtlCache::new(Duration::from_secs(10), 10);
        c.insert("k", 1);
        tokio::time::advance(Duration::from_secs(8)).await;
        c.insert("k", 2);
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(c.get(&"k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_capacity_drops_oldest() {
        let mut c = TtlCache::new(Duration::from_secs(100), 2);
        c.insert("a", 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        c.insert("b", 2);
        // reading does not save "a" from eviction
        assert_eq!(c.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        c.insert("c", 3);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&"a"), None);
        assert_eq!(c.get(&"b"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_full_cache_purges_expired_first() {
        let mut c = TtlCache::new(Duration::from_secs(10), 3);
        c.insert("a", 1);
        c.insert("b", 2);
        tokio::time::advance(Duration::from_secs(5)).await;
        c.insert("c", 3);
        tokio::time::advance(Duration::from_secs(5)).await;
        c.insert("d", 4);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&"c"), Some(3));
        assert_eq!(c.get(&"d"), Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_age_reported() {
        let mut c = TtlCache::new(Duration::from_secs(100), 2);
        c.insert("a", 1);
        tokio::time::advance(Duration::from_secs(7)).await;
        assert_eq!(c.get_with_age(&"a"), Some((1, Duration::from_secs(7))));
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut c = LruCache::new(3);
        c.insert("a", 1);
        c.insert("b", 2);
        c.insert("c", 3);
        assert_eq!(c.insert("d", 4), Some("a"));
        assert_eq!(c.len(), 3);
        assert!(!c.contains(&"a"));
    }

    #[test]
    fn lru_access_refreshes() {
        let mut c = LruCache::new(3);
        c.insert("a", 1);
        c.insert("b", 2);
        c.insert("c", 3);
        assert_eq!(c.get(&"a"), Some(1));
        assert_eq!(c.insert("d", 4), Some("b"));
        assert!(c.contains(&"a"));
    }

    #[test]
    fn lru_overwrite_does_not_evict() {
        let mut c = LruCache::new(2);
        c.insert("a", 1);
        c.insert("b", 2);
        assert_eq!(c.insert("a", 10), None);
        assert_eq!(c.get(&"a"), Some(10));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut c = LruCache::new(0);
        c.insert("a", 1);
        assert_eq!(c.capacity(), 1);
        assert_eq!(c.insert("b", 2), Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn lru_ttl_expires() {
        let mut c = LruCache::new(4).with_ttl(Duration::from_secs(30));
        c.insert("a", 1);
        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(c.get(&"a"), Some(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(c.get(&"a"), None);
    }
}
