//! Look-aside cache with bounded LRU eviction and per-key single-flight.
//!
//! Explicitly owned and injectable: tests build isolated instances with
//! deterministic eviction, nothing lives in a global.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

struct Entry<V> {
    value: Arc<V>,
    last_used: u64,
}

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Per-key gates serializing computation: at most one computation per
    /// key runs at any time, everyone else waits on the gate.
    inflight: HashMap<K, Arc<Mutex<()>>>,
    tick: u64,
}

pub struct AnalysisCache<K, V> {
    state: Mutex<State<K, V>>,
    capacity: usize,
}

impl<K, V> AnalysisCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                inflight: HashMap::new(),
                tick: 0,
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut state = self.state.lock().await;
        state.tick += 1;
        let tick = state.tick;
        state.entries.get_mut(key).map(|e| {
            e.last_used = tick;
            Arc::clone(&e.value)
        })
    }

    /// Insert directly, evicting the least-recently-used entry on overflow.
    /// Evicted values stay alive for any job still holding their `Arc`.
    pub async fn insert(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let mut state = self.state.lock().await;
        state.tick += 1;
        let tick = state.tick;
        state.entries.insert(
            key,
            Entry {
                value: Arc::clone(&value),
                last_used: tick,
            },
        );
        Self::evict_overflow(&mut state, self.capacity);
        value
    }

    /// Return the cached value for `key`, or run `compute` to produce it.
    ///
    /// Concurrent callers with the same key wait on the in-flight
    /// computation instead of duplicating it; callers with other keys are
    /// unaffected. A failed computation caches nothing; the next caller
    /// retries.
    pub async fn get_or_try_compute<F, Fut, E>(&self, key: K, compute: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let gate = {
            let mut state = self.state.lock().await;
            state.tick += 1;
            let tick = state.tick;
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.last_used = tick;
                return Ok(Arc::clone(&entry.value));
            }
            Arc::clone(
                state
                    .inflight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        // Serialize with any in-flight computation for this key. Whoever
        // wins the gate computes; the rest find the entry on re-check.
        let _guard = gate.lock().await;
        {
            let mut state = self.state.lock().await;
            state.tick += 1;
            let tick = state.tick;
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.last_used = tick;
                return Ok(Arc::clone(&entry.value));
            }
        }

        let result = compute().await;
        let mut state = self.state.lock().await;
        match result {
            Ok(value) => {
                // Only a successful computation retires the gate; after a
                // failure the same gate keeps serializing retries.
                state.inflight.remove(&key);
                let value = Arc::new(value);
                state.tick += 1;
                let tick = state.tick;
                state.entries.insert(
                    key,
                    Entry {
                        value: Arc::clone(&value),
                        last_used: tick,
                    },
                );
                Self::evict_overflow(&mut state, self.capacity);
                Ok(value)
            }
            Err(e) => Err(e),
        }
    }

    /// Drop every entry whose key matches the predicate (parameter change
    /// or file modification invalidation).
    pub async fn clear_matching(&self, mut predicate: impl FnMut(&K) -> bool) {
        let mut state = self.state.lock().await;
        state.entries.retain(|k, _| !predicate(k));
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.entries.clear();
    }

    fn evict_overflow(state: &mut State<K, V>, capacity: usize) {
        while state.entries.len() > capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    debug!("cache eviction (capacity {})", capacity);
                    state.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hit_after_miss() {
        let cache: AnalysisCache<u32, String> = AnalysisCache::new(4);
        let v = cache
            .get_or_try_compute(1, || async { Ok::<_, ()>("one".to_string()) })
            .await
            .unwrap();
        assert_eq!(*v, "one");
        assert_eq!(*cache.get(&1).await.unwrap(), "one");
    }

    #[tokio::test]
    async fn lru_evicts_oldest() {
        let cache: AnalysisCache<u32, u32> = AnalysisCache::new(2);
        cache.insert(1, 10).await;
        cache.insert(2, 20).await;
        // Touch 1 so that 2 becomes the eviction candidate.
        cache.get(&1).await;
        cache.insert(3, 30).await;

        assert!(cache.get(&2).await.is_none());
        assert!(cache.get(&1).await.is_some());
        assert!(cache.get(&3).await.is_some());
    }

    #[tokio::test]
    async fn failed_compute_is_not_cached() {
        let cache: AnalysisCache<u32, u32> = AnalysisCache::new(2);
        let err = cache
            .get_or_try_compute(7, || async { Err::<u32, _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");
        assert!(cache.get(&7).await.is_none());

        let ok = cache
            .get_or_try_compute(7, || async { Ok::<_, &str>(42) })
            .await
            .unwrap();
        assert_eq!(*ok, 42);
    }
}
