//! Bounded in-process TTL/LRU cache for read-mostly remote data.
//!
//! The client consults this cache on its read paths (actor/item search,
//! entity and world lookups) so equivalent requests do not hit the game
//! server twice. Entries expire lazily on read and are also swept by a
//! background task so memory is not held indefinitely by keys nobody reads
//! again. When the cache is at capacity, inserting evicts the entry with the
//! oldest last-access time (true LRU, not insertion order).
//!
//! # Known limitation
//!
//! [`ResponseCache::get_or_set`] is not exclusive: two tasks missing the same
//! key concurrently will each invoke the factory and each write the result
//! (last write wins). The factories used here are idempotent reads, so this
//! costs a duplicate fetch, never correctness.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Floor for the background sweep period.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for a [`ResponseCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// When false the cache is transparent: `get` always misses, `set` is a
    /// no-op, and `get_or_set` always invokes the factory.
    pub enabled: bool,
    /// TTL applied when `set` is called without an explicit one.
    pub default_ttl: Duration,
    /// Maximum number of entries held at once.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl: Duration::from_secs(300),
            max_entries: 500,
        }
    }
}

/// Point-in-time counters reported by [`ResponseCache::stats`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hits over total lookups, rounded to two decimal places.
    pub hit_rate: f64,
    pub size: usize,
    pub max_size: usize,
    pub evictions: u64,
}

struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    ttl: Duration,
    access_count: u64,
    last_access: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Keyed cache with per-entry TTL and least-recently-used eviction.
///
/// Constructed by the caller and injected into the client; there is no
/// process-wide shared instance.
pub struct ResponseCache<V> {
    inner: Arc<Mutex<CacheInner<V>>>,
    config: CacheConfig,
    sweeper: Option<JoinHandle<()>>,
}

impl<V: Clone + Send + 'static> ResponseCache<V> {
    /// Build a cache. When called inside a tokio runtime, a background sweep
    /// task is spawned at `max(default_ttl / 4, 30s)`; outside a runtime
    /// expiry is purely lazy (plus explicit [`ResponseCache::purge_expired`]).
    pub fn new(config: CacheConfig) -> Self {
        let inner = Arc::new(Mutex::new(CacheInner {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            evictions: 0,
        }));

        let sweeper = if config.enabled {
            tokio::runtime::Handle::try_current()
                .ok()
                .map(|handle| handle.spawn(sweep_loop(Arc::downgrade(&inner), sweep_interval(&config))))
        } else {
            None
        };

        Self {
            inner,
            config,
            sweeper,
        }
    }

    /// Look up a key, touching its last-access time on a hit. An expired
    /// entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.config.enabled {
            return None;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        match inner.entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                inner.entries.remove(key);
                inner.misses += 1;
                trace!(key, "cache entry expired");
                None
            }
            Some(entry) => {
                entry.access_count += 1;
                entry.last_access = now;
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert a value. `ttl` overrides the configured default for this entry
    /// only. If the cache is full and `key` is new, the least-recently-used
    /// entry is evicted first; capacity is never exceeded.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        if !self.config.enabled {
            return;
        }
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.config.max_entries {
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
                inner.evictions += 1;
                debug!(evicted = %oldest, "cache at capacity, evicted least-recently-used entry");
            }
        }
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: now,
                ttl: ttl.unwrap_or(self.config.default_ttl),
                access_count: 0,
                last_access: now,
            },
        );
    }

    /// Remove a key, reporting whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.remove(key).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
    }

    /// Return the cached value for `key`, invoking `factory` and caching its
    /// result on a miss. Not exclusive across await points; see the module
    /// docs.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        factory: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = factory().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Remove every expired entry now, returning how many were dropped. The
    /// background sweep calls this on its interval.
    pub fn purge_expired(&self) -> usize {
        purge_expired_inner(&self.inner)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("cache lock poisoned");
        let lookups = inner.hits + inner.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            ((inner.hits as f64 / lookups as f64) * 100.0).round() / 100.0
        };
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            hit_rate,
            size: inner.entries.len(),
            max_size: self.config.max_entries,
            evictions: inner.evictions,
        }
    }
}

impl<V> Drop for ResponseCache<V> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

fn sweep_interval(config: &CacheConfig) -> Duration {
    (config.default_ttl / 4).max(MIN_SWEEP_INTERVAL)
}

async fn sweep_loop<V>(inner: Weak<Mutex<CacheInner<V>>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so the sweep starts one full
    // period after construction.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let removed = purge_expired_inner(&inner);
        if removed > 0 {
            debug!(removed, "cache sweep removed expired entries");
        }
    }
}

fn purge_expired_inner<V>(inner: &Mutex<CacheInner<V>>) -> usize {
    let now = Instant::now();
    let mut inner = inner.lock().expect("cache lock poisoned");
    let before = inner.entries.len();
    inner.entries.retain(|_, entry| !entry.is_expired(now));
    before - inner.entries.len()
}

/// Compose a deterministic cache key from an operation name and its
/// normalized parameters. Equivalent requests (same operation, same
/// parameters after trimming and lowercasing) collide on the same key;
/// non-equivalent ones never do because the parameter names are part of the
/// key.
pub fn compose_key(operation: &str, params: &[(&str, &str)]) -> String {
    let mut key = String::from(operation);
    for (index, (name, value)) in params.iter().enumerate() {
        key.push(if index == 0 { '?' } else { '&' });
        key.push_str(name);
        key.push('=');
        key.push_str(&value.trim().to_lowercase());
    }
    key
}
