use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct CacheEntry<T> {
    data: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }

    pub fn data(&self) -> &T {
        &self.data
    }
}

/// Concurrent read-mostly cache with a per-entry TTL.
#[derive(Clone)]
pub struct TtlCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache: Arc<DashMap<K, CacheEntry<V>>>,
    default_ttl: Duration,
    last_cleanup: Arc<std::sync::Mutex<Instant>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            cache: Arc::new(DashMap::new()),
            default_ttl,
            last_cleanup: Arc::new(std::sync::Mutex::new(Instant::now())),
        }
    }

    /// Perform lazy cleanup if enough time has passed
    fn maybe_cleanup(&self) {
        const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

        // Check if cleanup is needed (non-blocking)
        if let Ok(mut last_cleanup) = self.last_cleanup.try_lock() {
            if last_cleanup.elapsed() >= CLEANUP_INTERVAL {
                *last_cleanup = Instant::now();
                drop(last_cleanup); // Release lock before cleanup

                // Drop every expired client at once
                self.cache.retain(|_, entry| !entry.is_expired());
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        // Perform lazy cleanup on get operations
        self.maybe_cleanup();

        self.cache.get(key).and_then(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(entry.data().clone())
            }
        })
    }

    pub fn insert(&self, key: K, value: V) {
        // Perform lazy cleanup on insert operations
        self.maybe_cleanup();

        self.cache
            .insert(key, CacheEntry::new(value, self.default_ttl));
    }

    pub fn invalidate(&self, key: &K) {
        self.cache.remove(key);
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

/// Registered clients keyed by `client_id`.
pub type ClientCache = TtlCache<String, crate::entity::oauth2_client::Model>;

impl Default for ClientCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30)) // 30 seconds, bounds staleness across instances
    }
}
