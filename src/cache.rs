//! Time-boxed key/value cache.
//!
//! Freshness is decided on every read (`now - fetched_at < ttl`); the
//! periodic sweep only bounds memory and is never needed for correctness.
//! Entries are TTL-tagged individually so one store can hold short-lived
//! aspect data next to long-lived market values.

use chrono::{Datelike, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Wall clock in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn current_year(&self) -> i32 {
        chrono::DateTime::from_timestamp_millis(self.now_ms())
            .map(|ts| ts.year())
            .unwrap_or_else(|| Utc::now().year())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn at(epoch_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(epoch_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub payload: T,
    pub fetched_at_epoch_ms: i64,
    pub ttl_ms: i64,
}

impl<T> CacheEntry<T> {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms - self.fetched_at_epoch_ms < self.ttl_ms
    }
}

pub struct TtlCache<T> {
    name: &'static str,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    clock: Arc<dyn Clock>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the payload only while the entry is fresh. Stale entries are
    /// left for the sweeper.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = self.clock.now_ms();
        let hit = self
            .lock()
            .get(key)
            .filter(|entry| entry.is_fresh(now))
            .map(|entry| entry.payload.clone());
        if hit.is_some() {
            crate::metrics::cache_hit(self.name);
        } else {
            crate::metrics::cache_miss(self.name);
        }
        hit
    }

    pub fn set(&self, key: impl Into<String>, payload: T, ttl: Duration) {
        let fetched_at = self.clock.now_ms();
        self.set_fetched_at(key, payload, ttl, fetched_at);
    }

    /// Inserts an entry that was fetched at an earlier instant, e.g. a
    /// record loaded back from a persisted snapshot.
    pub fn set_fetched_at(
        &self,
        key: impl Into<String>,
        payload: T,
        ttl: Duration,
        fetched_at_epoch_ms: i64,
    ) {
        let entry = CacheEntry {
            payload,
            fetched_at_epoch_ms,
            ttl_ms: ttl.as_millis() as i64,
        };
        self.lock().insert(key.into(), entry);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drops every entry whose key starts with `prefix`; returns how many.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|key, _| !key.starts_with(prefix));
        before - guard.len()
    }

    pub fn invalidate_all(&self) {
        self.lock().clear();
    }

    /// Removes stale entries; returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|_, entry| entry.is_fresh(now));
        let evicted = before - guard.len();
        if evicted > 0 {
            debug!(target = "motorval.cache", cache = self.name, evicted, "swept stale entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T: Clone + Send + 'static> TtlCache<T> {
    /// Runs `sweep` every `interval` until the handle is aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with_clock() -> (TtlCache<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at(1_000_000));
        let cache = TtlCache::new("test", clock.clone() as Arc<dyn Clock>);
        (cache, clock)
    }

    #[test]
    fn get_is_fresh_until_ttl_elapses() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", "v".to_string(), Duration::from_millis(500));
        clock.advance(Duration::from_millis(499));
        assert_eq!(cache.get("k").as_deref(), Some("v"));
        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn stale_read_does_not_delete_entry() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", "v".to_string(), Duration::from_secs(1));
        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.sweep(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn set_overwrites_and_resets_age() {
        let (cache, clock) = cache_with_clock();
        cache.set("k", "old".to_string(), Duration::from_secs(1));
        clock.advance(Duration::from_millis(900));
        cache.set("k", "new".to_string(), Duration::from_secs(1));
        clock.advance(Duration::from_millis(900));
        assert_eq!(cache.get("k").as_deref(), Some("new"));
    }

    #[test]
    fn ttl_is_chosen_per_entry() {
        let (cache, clock) = cache_with_clock();
        cache.set("short", "a".to_string(), Duration::from_secs(60));
        cache.set("long", "b".to_string(), Duration::from_secs(4 * 3600));
        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get("short"), None);
        assert_eq!(cache.get("long").as_deref(), Some("b"));
        assert_eq!(cache.sweep(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn set_fetched_at_honours_original_age() {
        let (cache, clock) = cache_with_clock();
        let now = clock.now_ms();
        cache.set_fetched_at("old", "x".to_string(), Duration::from_secs(10), now - 11_000);
        cache.set_fetched_at("recent", "y".to_string(), Duration::from_secs(10), now - 1_000);
        assert_eq!(cache.get("old"), None);
        assert_eq!(cache.get("recent").as_deref(), Some("y"));
    }

    #[test]
    fn invalidation() {
        let (cache, _clock) = cache_with_clock();
        let ttl = Duration::from_secs(60);
        cache.set("models:ford", "a".to_string(), ttl);
        cache.set("years:ford|mustang", "b".to_string(), ttl);
        cache.set("models:toyota", "c".to_string(), ttl);
        assert!(cache.invalidate("models:toyota"));
        assert!(!cache.invalidate("models:toyota"));
        assert_eq!(cache.invalidate_prefix("years:ford|"), 1);
        assert_eq!(cache.len(), 1);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn current_year_follows_clock() {
        // 2020-06-01T00:00:00Z
        let clock = ManualClock::at(1_590_969_600_000);
        assert_eq!(clock.current_year(), 2020);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_in_background() {
        let clock = Arc::new(ManualClock::at(0));
        let cache = Arc::new(TtlCache::new("test", clock.clone() as Arc<dyn Clock>));
        cache.set("k", "v".to_string(), Duration::from_secs(1));
        let handle = cache.spawn_sweeper(Duration::from_secs(30 * 60));
        clock.advance(Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(30 * 60 + 1)).await;
        assert!(cache.is_empty());
        handle.abort();
    }
}
