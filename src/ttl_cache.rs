use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Key/value store whose entries expire a fixed time after insertion.
///
/// Expiry is checked on read: a stale entry is evicted and reported as a miss,
/// so a failed refresh falls back to refetching rather than serving old data.
#[derive(Debug)]
pub struct TtlCache<V> {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn put(&self, key: impl Into<String>, value: V) {
        self.put_at(key, value, Instant::now());
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut entries = self.lock();
        let entry = entries.get(key)?;
        if now.saturating_duration_since(entry.stored_at) > self.ttl {
            entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub(crate) fn put_at(&self, key: impl Into<String>, value: V, now: Instant) {
        self.lock().insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.lock().remove(key).map(|e| e.value)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including ones not yet evicted.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        // A panic elsewhere never leaves an entry half-written.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_returns_identical_value() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.put("k", vec![1, 2, 3]);
        assert_eq!(cache.get("k"), Some(vec![1, 2, 3]));
        assert_eq!(cache.get("missing"), None);
    }

    #[test]
    fn expired_entry_is_a_miss_and_evicted() {
        let cache = TtlCache::new(Duration::from_secs(30));
        let start = Instant::now();
        cache.put_at("k", "v".to_string(), start);

        assert_eq!(
            cache.get_at("k", start + Duration::from_secs(30)),
            Some("v".to_string())
        );
        assert_eq!(cache.get_at("k", start + Duration::from_secs(31)), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn put_refreshes_timestamp() {
        let cache = TtlCache::new(Duration::from_secs(10));
        let start = Instant::now();
        cache.put_at("k", 1, start);
        cache.put_at("k", 2, start + Duration::from_secs(8));
        assert_eq!(cache.get_at("k", start + Duration::from_secs(15)), Some(2));
    }

    #[test]
    fn remove_returns_the_live_value() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.put("k", 7);
        assert_eq!(cache.remove("k"), Some(7));
        assert_eq!(cache.remove("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let cache = TtlCache::new(Duration::from_secs(10));
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert_eq!(cache.get("a"), None);
    }
}
