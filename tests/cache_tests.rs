//! Cache contract: single-flight per key, LRU bounds, eviction safety.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use audiolens::cache::AnalysisCache;

#[tokio::test]
async fn concurrent_requests_compute_exactly_once() {
    let cache: Arc<AnalysisCache<u32, u64>> = Arc::new(AnalysisCache::new(8));
    let computations = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let computations = Arc::clone(&computations);
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_try_compute(42, || async move {
                    computations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>(4242)
                })
                .await
                .unwrap()
        }));
    }

    for task in tasks {
        let value = task.await.unwrap();
        assert_eq!(*value, 4242, "every caller sees the same result");
    }
    assert_eq!(
        computations.load(Ordering::SeqCst),
        1,
        "in-flight duplicates must subscribe, not recompute"
    );
}

#[tokio::test]
async fn distinct_keys_do_not_serialize() {
    let cache: Arc<AnalysisCache<u32, u32>> = Arc::new(AnalysisCache::new(8));

    let start = std::time::Instant::now();
    let mut tasks = Vec::new();
    for key in 0..4u32 {
        let cache = Arc::clone(&cache);
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_try_compute(key, || async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok::<_, String>(key * 2)
                })
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // Four 100 ms computations overlapping, not back-to-back.
    assert!(
        start.elapsed() < Duration::from_millis(350),
        "independent keys must not block each other"
    );
}

#[tokio::test]
async fn capacity_is_bounded_with_lru_order() {
    let cache: AnalysisCache<u32, u32> = AnalysisCache::new(3);
    for key in 0..3 {
        cache.insert(key, key).await;
    }
    assert_eq!(cache.len().await, 3);

    // Touch 0 so 1 becomes least recently used.
    cache.get(&0).await;
    cache.insert(99, 99).await;

    assert_eq!(cache.len().await, 3);
    assert!(cache.get(&1).await.is_none(), "LRU entry evicted");
    assert!(cache.get(&0).await.is_some());
    assert!(cache.get(&99).await.is_some());
}

#[tokio::test]
async fn eviction_does_not_invalidate_held_results() {
    let cache: AnalysisCache<u32, String> = AnalysisCache::new(1);
    let held = cache.insert(1, "in use".to_string()).await;

    // Push the entry out of the cache while a job still holds it.
    cache.insert(2, "newer".to_string()).await;
    assert!(cache.get(&1).await.is_none());
    assert_eq!(*held, "in use", "evicted value stays alive for holders");
}

#[tokio::test]
async fn clear_matching_invalidates_selectively() {
    let cache: AnalysisCache<(u32, u32), u32> = AnalysisCache::new(8);
    cache.insert((1, 0), 10).await;
    cache.insert((1, 1), 11).await;
    cache.insert((2, 0), 20).await;

    cache.clear_matching(|key| key.0 == 1).await;
    assert!(cache.get(&(1, 0)).await.is_none());
    assert!(cache.get(&(1, 1)).await.is_none());
    assert!(cache.get(&(2, 0)).await.is_some());
}
