use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// A cached value together with the moment it was stored and its lifetime.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Valid iff strictly less than `ttl` has elapsed since it was stored.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < self.ttl
    }
}

/// Key to value map with per-entry time-to-live and lazy expiration.
///
/// Expired entries are evicted by the read that finds them stale; the check
/// and the eviction happen under the same lock.
///
/// # Examples
///
/// ```
/// use pulith_request::CacheStore;
/// use std::time::Duration;
///
/// let cache = CacheStore::new();
/// cache.set("users:1", "alice".to_string(), Duration::from_secs(60));
/// assert_eq!(cache.get("users:1").as_deref(), Some("alice"));
///
/// cache.delete("users:1");
/// assert_eq!(cache.get("users:1"), None);
/// ```
pub struct CacheStore<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<V> fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.lock().len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> CacheStore<V> {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

    pub fn new() -> Self {
        Self::with_default_ttl(Self::DEFAULT_TTL)
    }

    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return the value if present and unexpired, evicting it if stale.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh_at(now) => return Some(entry.value.clone()),
            Some(_) => {}
            None => return None,
        }
        entries.remove(key);
        trace!(key, "evicted expired cache entry");
        None
    }

    /// Store `value`, replacing any existing entry and stamping the current time.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        };
        self.entries.lock().insert(key.into(), entry);
    }

    /// Store `value` with the store's default time-to-live.
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Whether a fresh entry exists. Stale entries are evicted.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove one entry. Returns whether it existed, fresh or not.
    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, including stale ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every stale entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh_at(now));
        let purged = before - entries.len();
        if purged > 0 {
            trace!(purged, "purged expired cache entries");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn value_lives_strictly_less_than_ttl() {
        let cache = CacheStore::new();
        cache.set("k", 1, Duration::from_millis(5000));

        assert_eq!(cache.get("k"), Some(1));
        advance(Duration::from_millis(4999)).await;
        assert_eq!(cache.get("k"), Some(1));
        advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_read_evicts() {
        let cache = CacheStore::new();
        cache.set("k", "v", Duration::from_secs(1));
        advance(Duration::from_secs(2)).await;

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn set_overwrites_and_restamps() {
        let cache = CacheStore::new();
        cache.set("k", 1, Duration::from_secs(10));
        advance(Duration::from_secs(8)).await;
        cache.set("k", 2, Duration::from_secs(10));
        advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_is_never_fresh() {
        let cache = CacheStore::new();
        cache.set("k", 1, Duration::ZERO);
        assert_eq!(cache.get("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn set_default_uses_store_ttl() {
        let cache = CacheStore::with_default_ttl(Duration::from_secs(3));
        cache.set_default("k", 1);
        advance(Duration::from_secs(2)).await;
        assert!(cache.contains("k"));
        advance(Duration::from_secs(1)).await;
        assert!(!cache.contains("k"));
    }

    #[test]
    fn delete_and_clear() {
        let cache = CacheStore::new();
        cache.set_default("a", 1);
        cache.set_default("b", 2);

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));

        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_removes_only_stale() {
        let cache = CacheStore::new();
        cache.set("short", 1, Duration::from_secs(1));
        cache.set("long", 2, Duration::from_secs(10));
        advance(Duration::from_secs(5)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_on_distinct_keys() {
        let cache = std::sync::Arc::new(CacheStore::new());
        let mut handles = Vec::new();
        for task in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    let key = format!("{task}:{i}");
                    cache.set_default(key.clone(), i);
                    assert_eq!(cache.get(&key), Some(i));
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len(), 800);
    }
}
