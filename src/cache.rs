use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::trace;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Entries<V> {
    map: HashMap<String, Entry<V>>,
    /// Bumped by every invalidation.
    generation: u64,
}

/// Process-local key/value cache with a per-entry time-to-live.
///
/// Expiry is lazy: a stale entry is dropped when it is next read, and nothing
/// runs in the background. Writers invalidate explicitly. Each instance of the
/// server has its own cache, so after a mutation on one instance the others may
/// serve the previous value until their TTL runs out.
///
/// A reader takes [`ConsistencyCache::generation`] before fetching a value and
/// hands it back when storing it. If an invalidation happened in between, the
/// value is dropped instead of cached.
pub struct ConsistencyCache<V> {
    entries: Mutex<Entries<V>>,
    default_ttl: Duration,
}

impl<V: Clone> ConsistencyCache<V> {
    /// Suits a read-heavy, write-rare workload.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                generation: 0,
            }),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    fn lock(&self) -> MutexGuard<'_, Entries<V>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached value, if it has not yet expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.lock();
        match entries.map.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                trace!("cache entry {key} expired");
                entries.map.remove(key);
                None
            }
            None => None,
        }
    }

    /// The current generation, to pass to [`ConsistencyCache::set`] once the
    /// value being fetched arrives.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Cache `value` unless the cache was invalidated since `generation` was
    /// taken. Returns whether it was stored.
    pub fn set(&self, key: &str, value: V, ttl: Duration, generation: u64) -> bool {
        let mut entries = self.lock();
        if entries.generation != generation {
            trace!("cache entry {key} invalidated while it was being read, not storing");
            return false;
        }
        let expires_at = Instant::now() + ttl;
        entries.map.insert(key.to_string(), Entry { value, expires_at });
        true
    }

    /// [`ConsistencyCache::set`] with the default TTL.
    pub fn put(&self, key: &str, value: V, generation: u64) -> bool {
        self.set(key, value, self.default_ttl, generation)
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self.lock();
        entries.generation += 1;
        if entries.map.remove(key).is_some() {
            trace!("cache entry {key} invalidated");
        }
    }

    /// Drop every entry. Used on teardown and by tests.
    pub fn clear(&self) {
        let mut entries = self.lock();
        entries.generation += 1;
        entries.map.clear();
    }
}

impl<V: Clone> Default for ConsistencyCache<V> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TTL)
    }
}
