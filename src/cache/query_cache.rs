//! TTL + LRU query result cache.
//!
//! Entries are immutable once stored; a repeated `set` for the same key
//! replaces the entry wholesale. Expired entries are dropped lazily on
//! lookup and eagerly by the periodic sweep, so nothing outlives its TTL by
//! more than one sweep interval. When the entry cap is exceeded the
//! least-recently-used entry goes first, ties broken by earliest insertion.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;
use crate::transport::Row;

struct CacheEntry {
    value: Arc<Vec<Row>>,
    inserted_at: Instant,
    last_used_at: Instant,
    ttl: Duration,
    /// Monotonic insertion sequence; breaks LRU ties.
    sequence: u64,
    size_bytes: usize,
    /// Invalidation tags, normally the table names the result came from.
    tags: Vec<String>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    next_sequence: u64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub size_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

pub struct QueryCache {
    state: Mutex<CacheState>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                next_sequence: 0,
            }),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Look up a key. Expired entries count as misses and are dropped on
    /// the spot. A hit refreshes the entry's recency.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<Row>>> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = match state.entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                entry.last_used_at = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.value));
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            state.entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value under `key`. `ttl` defaults to the configured TTL.
    /// May synchronously evict the coldest entries if the cap is exceeded.
    pub fn set(&self, key: &str, value: Arc<Vec<Row>>, ttl: Option<Duration>, tags: Vec<String>) {
        let now = Instant::now();
        let size_bytes = estimate_size(&value);
        let mut state = self.state.lock();

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                inserted_at: now,
                last_used_at: now,
                ttl: ttl.unwrap_or(self.config.default_ttl),
                sequence,
                size_bytes,
                tags,
            },
        );

        while state.entries.len() > self.config.max_entries {
            let coldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| (e.last_used_at, e.sequence))
                .map(|(k, _)| k.clone());
            match coldest {
                Some(k) => {
                    state.entries.remove(&k);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!("evicted cache entry {k}");
                }
                None => break,
            }
        }
    }

    /// Remove an exact key or every entry carrying the given tag. Returns
    /// the number of removed entries.
    pub fn invalidate(&self, tag_or_key: &str) -> usize {
        let mut state = self.state.lock();
        if state.entries.remove(tag_or_key).is_some() {
            return 1;
        }
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.tags.iter().any(|t| t == tag_or_key))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            state.entries.remove(key);
        }
        doomed.len()
    }

    /// Drop every expired entry. Run periodically by the scheduler so no
    /// entry outlives its TTL by more than one sweep interval.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            state.entries.remove(key);
        }
        let count = doomed.len();
        self.expirations.fetch_add(count as u64, Ordering::Relaxed);
        if count > 0 {
            debug!("cache sweep removed {count} expired entries");
        }
        count
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            size_bytes: state.entries.values().map(|e| e.size_bytes).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}

/// Serialized-size estimate; good enough for pressure accounting.
fn estimate_size(rows: &[Row]) -> usize {
    rows.iter()
        .map(|r| serde_json::to_string(r).map(|s| s.len()).unwrap_or(0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(max_entries: usize, default_ttl_ms: u64) -> QueryCache {
        QueryCache::new(CacheConfig {
            default_ttl: Duration::from_millis(default_ttl_ms),
            max_entries,
            sweep_interval: Duration::from_secs(10),
        })
    }

    fn rows(v: i64) -> Arc<Vec<Row>> {
        Arc::new(vec![json!({ "value": v })])
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = cache(10, 1000);
        cache.set("a", rows(42), None, vec![]);
        assert_eq!(cache.get("a"), Some(rows(42)));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(cache.get("a"), None);
        // a fresh set after expiry works again
        cache.set("a", rows(43), None, vec![]);
        assert_eq!(cache.get("a"), Some(rows(43)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lru_eviction_spares_recently_used() {
        let cache = cache(2, 60_000);
        cache.set("a", rows(1), None, vec![]);
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.set("b", rows(2), None, vec![]);
        tokio::time::advance(Duration::from_millis(10)).await;

        // touch "a" so "b" becomes the coldest
        assert!(cache.get("a").is_some());
        tokio::time::advance(Duration::from_millis(10)).await;

        cache.set("c", rows(3), None, vec![]);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_tie_broken_by_insertion_order() {
        let cache = cache(2, 60_000);
        // same tick, so recency ties; "a" was inserted first and must go
        cache.set("a", rows(1), None, vec![]);
        cache.set("b", rows(2), None, vec![]);
        cache.set("c", rows(3), None, vec![]);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tag_invalidation() {
        let cache = cache(10, 60_000);
        cache.set("q1", rows(1), None, vec!["strategies".into()]);
        cache.set("q2", rows(2), None, vec!["strategies".into()]);
        cache.set("q3", rows(3), None, vec!["robots".into()]);

        assert_eq!(cache.invalidate("strategies"), 2);
        assert!(cache.get("q1").is_none());
        assert!(cache.get("q2").is_none());
        assert!(cache.get("q3").is_some());

        // exact-key invalidation wins over tag scanning
        assert_eq!(cache.invalidate("q3"), 1);
        assert!(cache.get("q3").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let cache = cache(10, 60_000);
        cache.set("short", rows(1), Some(Duration::from_millis(100)), vec![]);
        cache.set("long", rows(2), None, vec![]);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.get("long").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_is_wholesale() {
        let cache = cache(10, 1000);
        cache.set("a", rows(1), None, vec![]);
        tokio::time::advance(Duration::from_millis(900)).await;
        // replacement resets the TTL clock
        cache.set("a", rows(2), None, vec![]);
        tokio::time::advance(Duration::from_millis(900)).await;
        assert_eq!(cache.get("a"), Some(rows(2)));
    }
}
