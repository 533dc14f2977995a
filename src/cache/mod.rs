//! Bounded, expiring, thread-safe key-value cache.
//!
//! [`BoundedCache`] is the one piece of shared mutable state in the crate.
//! DNS answers, TLS client configs and authentication verdicts each get their
//! own instance, owned by the component that fills it.
//!
//! Guarantees:
//!
//! - the number of stored entries never exceeds the configured capacity;
//!   when full, the least-recently-used entry is dropped;
//! - [`get`](BoundedCache::get) never returns an entry written more than
//!   `ttl` ago, whether or not it has been swept yet;
//! - the eviction callback sees every entry removed by capacity pressure or
//!   expiry (not overwrites), and always runs with the internal lock released.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

/// Called with every entry evicted by capacity pressure or expiry.
pub type EvictCallback<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

struct Entry<V> {
    value: V,
    written_at: Instant,
}

/// A concurrent LRU cache with a fixed capacity and a per-entry TTL.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use rttp_proxy::cache::BoundedCache;
///
/// let cache = BoundedCache::new(2, Duration::from_secs(60));
/// cache.add("a", 1);
/// cache.add("b", 2);
/// cache.add("c", 3); // "a" is least recently used and goes away
///
/// assert_eq!(cache.get("a"), None);
/// assert_eq!(cache.get("c"), Some(3));
/// assert_eq!(cache.len(), 2);
/// ```
pub struct BoundedCache<K, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
    on_evict: Option<EvictCallback<K, V>>,
    clock: Arc<dyn Clock>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// Creates a cache holding at most `capacity` entries, each living `ttl`.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            on_evict: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Installs a callback for entries evicted by capacity or expiry.
    #[must_use]
    pub fn with_evict_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&K, &V) + Send + Sync + 'static,
    {
        self.on_evict = Some(Arc::new(callback));
        self
    }

    /// Replaces the time source used to stamp and expire entries.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns a clone of the live value for `key`, marking it recently used.
    ///
    /// An entry older than the TTL is removed and reported as missing.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let expired = {
            let mut entries = self.lock();
            let live = entries
                .get(key)
                .map(|entry| (!self.is_expired(entry, now)).then(|| entry.value.clone()));
            match live {
                Some(Some(value)) => return Some(value),
                Some(None) => entries.pop_entry(key),
                None => None,
            }
        };

        if let Some((key, entry)) = expired {
            self.evicted(&key, &entry.value);
        }
        None
    }

    /// Inserts or overwrites `key`, resetting its age.
    ///
    /// When the cache is full the least-recently-used entry is evicted.
    pub fn add(&self, key: K, value: V) {
        let now = self.clock.now();
        let displaced = {
            let mut entries = self.lock();
            if let Some(entry) = entries.get_mut(&key) {
                entry.value = value;
                entry.written_at = now;
                None
            } else {
                entries.push(
                    key,
                    Entry {
                        value,
                        written_at: now,
                    },
                )
            }
        };

        if let Some((key, entry)) = displaced {
            self.evicted(&key, &entry.value);
        }
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.written_at) >= self.ttl
    }

    fn evicted(&self, key: &K, value: &V) {
        if let Some(callback) = &self.on_evict {
            callback(key, value);
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, Entry<V>>> {
        // Entries are plain data; a panic in another holder cannot leave them torn.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Hash + Eq + Clone, V: Clone> BoundedCache<K, V> {
    /// Physically removes every expired entry and returns how many went away.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let removed: Vec<(K, Entry<V>)> = {
            let mut entries = self.lock();
            let stale: Vec<K> = entries
                .iter()
                .filter(|(_, entry)| self.is_expired(entry, now))
                .map(|(key, _)| key.clone())
                .collect();
            stale
                .iter()
                .filter_map(|key| entries.pop_entry(key))
                .collect()
        };

        for (key, entry) in &removed {
            self.evicted(key, &entry.value);
        }
        removed.len()
    }
}

impl<K, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedCache")
            .field("ttl", &self.ttl)
            .field("has_evict_callback", &self.on_evict.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn manual(capacity: usize, ttl: Duration) -> (BoundedCache<String, u32>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = BoundedCache::new(capacity, ttl).with_clock(clock.clone());
        (cache, clock)
    }

    #[test]
    fn never_exceeds_capacity() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evictions);
        let cache = BoundedCache::new(8, Duration::from_secs(60))
            .with_evict_callback(move |_: &u32, _: &u32| {
                counter.fetch_add(1, Ordering::Relaxed);
            });

        for i in 0..1000 {
            cache.add(i, i);
            assert!(cache.len() <= 8);
        }
        assert_eq!(cache.len(), 8);
        assert_eq!(evictions.load(Ordering::Relaxed), 992);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = BoundedCache::new(2, Duration::from_secs(60));
        cache.add("a", 1);
        cache.add("b", 2);
        assert_eq!(cache.get("a"), Some(1)); // "b" is now the oldest
        cache.add("c", 3);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn expires_after_ttl_without_write() {
        let (cache, clock) = manual(4, Duration::from_secs(10));
        cache.add("host".to_owned(), 7);

        clock.advance(Duration::from_secs(9));
        assert_eq!(cache.get("host"), Some(7));

        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get("host"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn overwrite_resets_age_and_skips_callback() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&evictions);
        let clock = Arc::new(ManualClock::new());
        let cache = BoundedCache::new(4, Duration::from_secs(10))
            .with_clock(clock.clone())
            .with_evict_callback(move |_: &&str, _: &u32| {
                counter.fetch_add(1, Ordering::Relaxed);
            });

        cache.add("k", 1);
        clock.advance(Duration::from_secs(8));
        cache.add("k", 2);
        clock.advance(Duration::from_secs(8));

        assert_eq!(cache.get("k"), Some(2));
        assert_eq!(evictions.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn expiry_fires_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let clock = Arc::new(ManualClock::new());
        let cache = BoundedCache::new(4, Duration::from_secs(1))
            .with_clock(clock.clone())
            .with_evict_callback(move |k: &String, v: &u32| {
                sink.lock().unwrap().push((k.clone(), *v));
            });

        cache.add("gone".to_owned(), 1);
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("gone"), None);
        assert_eq!(*seen.lock().unwrap(), vec![("gone".to_owned(), 1)]);
    }

    #[test]
    fn callback_receives_capacity_evictions() {
        let overflow: Arc<BoundedCache<u32, u32>> =
            Arc::new(BoundedCache::new(1, Duration::from_secs(60)));
        let sink = Arc::clone(&overflow);
        let cache = BoundedCache::new(1, Duration::from_secs(60))
            .with_evict_callback(move |k: &u32, v: &u32| sink.add(*k, *v));

        cache.add(1, 10);
        cache.add(2, 20);
        assert_eq!(cache.get(&2), Some(20));
        assert_eq!(overflow.get(&1), Some(10));
    }

    #[test]
    fn purge_removes_only_expired() {
        let (cache, clock) = manual(8, Duration::from_secs(10));
        cache.add("old-1".to_owned(), 1);
        cache.add("old-2".to_owned(), 2);
        clock.advance(Duration::from_secs(6));
        cache.add("fresh".to_owned(), 3);
        clock.advance(Duration::from_secs(5));

        assert_eq!(cache.purge_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fresh"), Some(3));
    }

    #[test]
    fn zero_capacity_holds_one() {
        let cache = BoundedCache::new(0, Duration::from_secs(1));
        cache.add(1, 1);
        cache.add(2, 2);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_writers_respect_capacity() {
        let cache = Arc::new(BoundedCache::new(16, Duration::from_secs(60)));
        thread::scope(|s| {
            for t in 0..8u32 {
                let cache = Arc::clone(&cache);
                s.spawn(move || {
                    for i in 0..500u32 {
                        cache.add(t * 1000 + i, i);
                        let _ = cache.get(&(t * 1000 + i / 2));
                        assert!(cache.len() <= 16);
                    }
                });
            }
        });
        assert_eq!(cache.len(), 16);
    }
}
