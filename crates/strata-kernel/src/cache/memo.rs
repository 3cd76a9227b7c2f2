//! TTL map with per-key request coalescing.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::vfs::{FsError, FsResult};

/// A cached value with its expiry. `None` never expires.
#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> Slot<V> {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

type Flight<V> = Arc<OnceCell<Result<V, FsError>>>;

/// Concurrent TTL map plus single-flight loading.
///
/// Expired entries are never returned and are dropped on the read that
/// notices them. All clocks are [`tokio::time::Instant`] so paused-time
/// tests drive expiry.
pub struct MemoCache<K, V> {
    entries: DashMap<K, Slot<V>>,
    inflight: DashMap<K, Flight<V>>,
}

impl<K, V> Default for MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> MemoCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    /// Get a live value.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .map(|slot| slot.is_live(now).then(|| slot.value.clone()));
        match hit {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove_if(key, |_, slot| !slot.is_live(now));
                None
            }
            None => None,
        }
    }

    /// Insert a value. `ttl: None` keeps it until explicitly removed.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(key, Slot { value, expires_at });
    }

    /// Mutate a live value in place, keeping its expiry.
    ///
    /// Returns `false` when there is no live value to update.
    pub fn update(&self, key: &K, f: impl FnOnce(&mut V)) -> bool {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut slot) if slot.is_live(now) => {
                f(&mut slot.value);
                true
            }
            _ => false,
        }
    }

    pub fn del(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, slot)| slot.value)
    }

    /// Remove every entry whose key matches.
    pub fn del_matching(&self, mut pred: impl FnMut(&K) -> bool) {
        self.entries.retain(|k, _| !pred(k));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, slot| slot.is_live(now));
    }

    /// Number of stored entries, live or not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `load` at most once at a time per key.
    ///
    /// Callers arriving while a load for the same key is in flight wait for
    /// it and receive a clone of its result, error included. Nothing is
    /// cached here; `load` decides what to store.
    pub async fn single_flight<F, Fut>(&self, key: K, load: F) -> FsResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FsResult<V>>,
    {
        let flight = Arc::clone(
            self.inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );
        let result = flight.get_or_init(load).await.clone();
        self.inflight
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &flight));
        result
    }

    /// Return a live value or load, store, and return a fresh one.
    ///
    /// Loads are coalesced; failures are not cached.
    pub async fn get_or_load<F, Fut>(&self, key: K, ttl: Option<Duration>, load: F) -> FsResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FsResult<V>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let store_key = key.clone();
        self.single_flight(key, || async move {
            let value = load().await?;
            self.set(store_key, value.clone(), ttl);
            Ok(value)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache: MemoCache<String, u32> = MemoCache::new();
        cache.set("a".into(), 1, Some(Duration::from_secs(10)));
        cache.set("forever".into(), 2, None);
        assert_eq!(cache.get(&"a".into()), Some(1));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get(&"a".into()), None);
        assert_eq!(cache.get(&"forever".into()), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_keeps_expiry() {
        let cache: MemoCache<&str, Vec<u32>> = MemoCache::new();
        cache.set("k", vec![1], Some(Duration::from_secs(5)));
        assert!(cache.update(&"k", |v| v.push(2)));
        assert_eq!(cache.get(&"k"), Some(vec![1, 2]));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!cache.update(&"k", |v| v.push(3)));
        assert!(!cache.update(&"missing", |v| v.push(3)));
    }

    #[tokio::test]
    async fn test_single_flight_coalesces() {
        let cache: Arc<MemoCache<&'static str, u32>> = Arc::new(MemoCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let futures = (0..8).map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            async move {
                cache
                    .single_flight("k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(7)
                    })
                    .await
            }
        });
        let results = futures::future::join_all(futures).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(7))));
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_single_flight_shares_errors_and_retries_after() {
        let cache: MemoCache<&str, u32> = MemoCache::new();
        let err = cache
            .single_flight("k", || async { Err(FsError::object_not_found("/k")) })
            .await
            .unwrap_err();
        assert!(err.is_object_not_found());

        let ok = cache.get_or_load("k", None, || async { Ok(3) }).await.unwrap();
        assert_eq!(ok, 3);
        assert_eq!(cache.get(&"k"), Some(3));
    }

    #[test]
    fn test_del_matching() {
        let cache: MemoCache<String, u32> = MemoCache::new();
        cache.set("/a/b".into(), 1, None);
        cache.set("/a/b:10.0.0.1".into(), 2, None);
        cache.set("/a/c".into(), 3, None);
        cache.del_matching(|k| k == "/a/b" || k.starts_with("/a/b:"));
        assert_eq!(cache.len(), 1);
    }
}
