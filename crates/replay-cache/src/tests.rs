use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use replay_cache_test::CallCounter;
use tokio::time::Instant;

use crate::{
    CacheContents, CacheError, CacheKey, CacheStreamExt, DiskReplayStore, DiskStore, Expiration,
    InMemoryStore, Store,
};

/// Emits each key at its millisecond offset from now. Runs under the paused
/// tokio clock, so scenarios play out in virtual time.
fn keys_at<K: Send + 'static>(timeline: Vec<(u64, K)>) -> BoxStream<'static, K> {
    let start = Instant::now();
    stream::iter(timeline)
        .then(move |(offset, key)| {
            let deadline = start + Duration::from_millis(offset);
            async move {
                tokio::time::sleep_until(deadline).await;
                key
            }
        })
        .boxed()
}

#[tokio::test]
async fn cache_map_computes_each_key_once() {
    let calls = CallCounter::new();
    let out: Vec<u32> = {
        let calls = calls.clone();
        stream::iter(vec![1u32, 1])
            .cache_map(move |k| {
                calls.bump();
                *k
            })
            .collect()
            .await
    };

    assert_eq!(out, vec![1, 1]);
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn cache_map_bypasses_non_cacheable_keys() {
    let calls = CallCounter::new();
    let out: Vec<u32> = {
        let calls = calls.clone();
        stream::iter(vec![1u32, 2, 1, 3])
            .cache_map_with(
                InMemoryStore::new(),
                move |k| {
                    calls.bump();
                    *k
                },
                |k: &u32| *k == 1,
            )
            .collect()
            .await
    };

    // Key 1 is cached across both occurrences; 2 and 3 are computed fresh.
    assert_eq!(out, vec![1, 2, 1, 3]);
    assert_eq!(calls.count(), 3);
}

#[tokio::test]
async fn reset_forces_recomputation() {
    let calls = CallCounter::new();
    let store = Arc::new(InMemoryStore::<u32>::new());
    let transform = {
        let calls = calls.clone();
        move |k: &u32| {
            calls.bump();
            k * 10
        }
    };

    let out: Vec<u32> = stream::iter(vec![1u32])
        .cache_map_with(Arc::clone(&store), transform.clone(), |_: &u32| true)
        .collect()
        .await;
    assert_eq!(out, vec![10]);
    assert_eq!(calls.count(), 1);

    let out: Vec<u32> = stream::iter(vec![1u32])
        .cache_map_with(Arc::clone(&store), transform.clone(), |_: &u32| true)
        .collect()
        .await;
    assert_eq!(out, vec![10]);
    assert_eq!(calls.count(), 1);

    store.reset();

    let out: Vec<u32> = stream::iter(vec![1u32])
        .cache_map_with(Arc::clone(&store), transform, |_: &u32| true)
        .collect()
        .await;
    assert_eq!(out, vec![10]);
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn cache_flat_map_runs_producer_once_per_key() {
    let calls = CallCounter::new();
    let out: Vec<CacheContents<u32>> = {
        let calls = calls.clone();
        stream::iter(vec![1u32, 1])
            .cache_flat_map(move |k: &u32| {
                calls.bump();
                stream::iter(vec![Ok(*k)])
            })
            .collect()
            .await
    };

    assert_eq!(out, vec![Ok(1), Ok(1)]);
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn cache_flat_map_replays_buffered_history() {
    // Counts how often the underlying producer stream emitted, as opposed to
    // how often values were observed downstream.
    let playback = CallCounter::new();
    let out: Vec<CacheContents<u32>> = {
        let playback = playback.clone();
        stream::iter(vec![1u32, 1])
            .cache_flat_map(move |k: &u32| {
                let playback = playback.clone();
                stream::iter(vec![Ok(*k), Ok(*k)]).inspect(move |_| {
                    playback.bump();
                })
            })
            .collect()
            .await
    };

    // Two occurrences of a two-value producer: four observed values, but the
    // producer itself emitted only twice.
    assert_eq!(out.len(), 4);
    assert!(out.into_iter().all(|item| item == Ok(1)));
    assert_eq!(playback.count(), 2);
}

#[tokio::test]
async fn cache_flat_map_replays_errors_per_occurrence() {
    let calls = CallCounter::new();
    let out: Vec<CacheContents<u32>> = {
        let calls = calls.clone();
        stream::iter(vec![1u32, 1])
            .cache_flat_map(move |_: &u32| {
                calls.bump();
                stream::iter(vec![Ok(1), Err(CacheError::Producer("boom".into()))])
            })
            .collect()
            .await
    };

    assert_eq!(calls.count(), 1);
    assert_eq!(out.iter().filter(|item| **item == Ok(1)).count(), 2);
    let boom = Err(CacheError::Producer("boom".into()));
    assert_eq!(out.iter().filter(|item| **item == boom).count(), 2);
}

#[tokio::test(start_paused = true)]
async fn cache_flat_map_latest_switches_and_serves_cache() {
    let calls = CallCounter::new();
    let out: Vec<CacheContents<u32>> = {
        let calls = calls.clone();
        // Key 2 is switched away from before its producer finishes; key 1
        // completes and its repeat is served from cache.
        keys_at(vec![(0, 2u32), (500, 1), (2000, 1)])
            .cache_flat_map_latest(move |k: &u32| {
                calls.bump();
                let k = *k;
                stream::once(async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(k)
                })
            })
            .collect()
            .await
    };

    assert_eq!(out, vec![Ok(1), Ok(1)]);
    assert_eq!(calls.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn revisiting_a_cancelled_key_refetches() {
    let calls = CallCounter::new();
    let out: Vec<CacheContents<u32>> = {
        let calls = calls.clone();
        keys_at(vec![(0, 2u32), (500, 1), (2000, 2)])
            .cache_flat_map_latest(move |k: &u32| {
                calls.bump();
                let k = *k;
                stream::once(async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(k)
                })
            })
            .collect()
            .await
    };

    // Key 2's first unit was cancelled mid-flight; its revisit replaces the
    // inert entry and runs the producer again.
    assert_eq!(out, vec![Ok(1), Ok(2)]);
    assert_eq!(calls.count(), 3);
}

#[tokio::test(start_paused = true)]
async fn until_expired_serves_cached_value_before_expiry() {
    let calls = CallCounter::new();
    let out: Vec<CacheContents<u32>> = {
        let calls = calls.clone();
        keys_at(vec![(0, 1u32), (500, 1), (1000, 1)])
            .cache_flat_map_until_expired(move |_: &u32| {
                let n = calls.bump() as u32;
                stream::once(async move { Ok((n, Expiration::after(Duration::from_secs(2)))) })
            })
            .collect()
            .await
    };

    assert_eq!(out, vec![Ok(0), Ok(0), Ok(0)]);
    assert_eq!(calls.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn until_expired_refetches_past_expiry() {
    let calls = CallCounter::new();
    let out: Vec<CacheContents<u32>> = {
        let calls = calls.clone();
        keys_at(vec![(0, 1u32), (500, 1), (1000, 1)])
            .cache_flat_map_until_expired(move |_: &u32| {
                let n = calls.bump() as u32;
                stream::once(async move { Ok((n, Expiration::after(Duration::from_millis(600)))) })
            })
            .collect()
            .await
    };

    // The reads at 0ms and 500ms are inside the TTL; the read at 1000ms finds
    // the pair expired and triggers exactly one re-fetch.
    assert_eq!(out, vec![Ok(0), Ok(0), Ok(1)]);
    assert_eq!(calls.count(), 2);
}

#[tokio::test(start_paused = true)]
async fn refetched_unit_is_stored_back() {
    let calls = CallCounter::new();
    let out: Vec<CacheContents<u32>> = {
        let calls = calls.clone();
        keys_at(vec![(0, 1u32), (1000, 1), (1500, 1)])
            .cache_flat_map_until_expired(move |_: &u32| {
                let n = calls.bump() as u32;
                stream::once(async move { Ok((n, Expiration::after(Duration::from_millis(600)))) })
            })
            .collect()
            .await
    };

    // The re-fetch at 1000ms replaced the expired entry, so the read at
    // 1500ms is served from the fresh unit without another invocation.
    assert_eq!(out, vec![Ok(0), Ok(1), Ok(1)]);
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn invalidating_on_behaves_like_until_expired() {
    let calls = CallCounter::new();
    let out: Vec<CacheContents<u32>> = {
        let calls = calls.clone();
        stream::iter(vec![1u32, 1])
            .cache_flat_map_invalidating_on(move |k: &u32| {
                calls.bump();
                let k = *k;
                stream::once(async move { Ok((k, Expiration::after(Duration::from_secs(3600)))) })
            })
            .collect()
            .await
    };

    assert_eq!(out, vec![Ok(1), Ok(1)]);
    assert_eq!(calls.count(), 1);
}

#[tokio::test]
async fn disk_cached_values_survive_a_new_store_instance() {
    replay_cache_test::setup();
    let dir = replay_cache_test::tempdir();
    let calls = CallCounter::new();
    let transform = {
        let calls = calls.clone();
        move |k: &u32| {
            calls.bump();
            k * 10
        }
    };

    let out: Vec<u32> = stream::iter(vec![1u32])
        .cache_map_with(
            DiskStore::with_root(dir.path(), "values"),
            transform.clone(),
            |_: &u32| true,
        )
        .collect()
        .await;
    assert_eq!(out, vec![10]);
    assert_eq!(calls.count(), 1);

    // A fresh store instance pointed at the same id reads from disk.
    let out: Vec<u32> = stream::iter(vec![1u32])
        .cache_map_with(
            DiskStore::with_root(dir.path(), "values"),
            transform.clone(),
            |_: &u32| true,
        )
        .collect()
        .await;
    assert_eq!(out, vec![10]);
    assert_eq!(calls.count(), 1);

    // After a reset the key misses and is recomputed exactly once.
    let store = Arc::new(DiskStore::<u32>::with_root(dir.path(), "values"));
    store.reset();
    let out: Vec<u32> = stream::iter(vec![1u32])
        .cache_map_with(Arc::clone(&store), transform, |_: &u32| true)
        .collect()
        .await;
    assert_eq!(out, vec![10]);
    assert_eq!(calls.count(), 2);
}

#[tokio::test]
async fn disk_replay_histories_survive_a_new_store_instance() {
    replay_cache_test::setup();
    let dir = replay_cache_test::tempdir();
    let calls = CallCounter::new();
    let producer = {
        let calls = calls.clone();
        move |k: &u32| {
            calls.bump();
            stream::iter(vec![Ok(*k), Ok(k + 1)])
        }
    };

    let out: Vec<CacheContents<u32>> = stream::iter(vec![7u32])
        .cache_flat_map_with(
            DiskReplayStore::with_root(dir.path(), "api"),
            producer.clone(),
            |_: &u32| true,
        )
        .collect()
        .await;
    assert_eq!(out, vec![Ok(7), Ok(8)]);
    assert_eq!(calls.count(), 1);

    // The history landed under the content-addressed name, in the documented
    // wire format.
    let path = dir
        .path()
        .join("replay-cache.api")
        .join(CacheKey::from_key(&7u32).unwrap().cache_path());
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        r#"[{"next":7},{"next":8},{"completed":true}]"#
    );

    // A fresh instance replays from disk without touching the producer.
    let out: Vec<CacheContents<u32>> = stream::iter(vec![7u32])
        .cache_flat_map_with(
            DiskReplayStore::with_root(dir.path(), "api"),
            producer.clone(),
            |_: &u32| true,
        )
        .collect()
        .await;
    assert_eq!(out, vec![Ok(7), Ok(8)]);
    assert_eq!(calls.count(), 1);

    // Reset, then the same key recomputes exactly once.
    let store = Arc::new(DiskReplayStore::<u32>::with_root(dir.path(), "api"));
    store.reset();
    let out: Vec<CacheContents<u32>> = stream::iter(vec![7u32])
        .cache_flat_map_with(Arc::clone(&store), producer, |_: &u32| true)
        .collect()
        .await;
    assert_eq!(out, vec![Ok(7), Ok(8)]);
    assert_eq!(calls.count(), 2);
}
