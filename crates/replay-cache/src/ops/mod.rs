//! The operator surface: caching adapters over streams of keys.
//!
//! Every operator is the same two-stage pipeline. A *fold* maps each incoming
//! key through the backing store — strictly sequentially, so an
//! insert-if-absent decision never races another occurrence of the same key —
//! and selects the cached or freshly started unit for that key. A *reduction*
//! then turns the selected units into the outward stream: the identity for
//! [`cache_map`](CacheStreamExt::cache_map), a concurrent merge for
//! [`cache_flat_map`](CacheStreamExt::cache_flat_map), a switch-to-newest for
//! [`cache_flat_map_latest`](CacheStreamExt::cache_flat_map_latest).

use std::sync::Arc;

use futures::Stream;
use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;

use crate::error::CacheContents;
use crate::expiry::Expiration;
use crate::key::CacheKey;
use crate::replay::SharedReplay;
use crate::store::{InMemoryStore, Store};

mod flatten_latest;
mod revalidate;

use flatten_latest::FlattenLatest;
use revalidate::Revalidate;

/// The per-key fold step shared by the flat-map family.
///
/// Non-cacheable keys (and keys that fail canonical serialization, which is
/// an infrastructure problem and already logged) get a fresh unit that never
/// touches the store. Cacheable keys reuse a live stored unit, and replace a
/// missing or cancelled one — the only implicit overwrite, since a cancelled
/// unit can never emit again.
fn lookup_or_insert<K, T, St, F, P, C>(
    store: &St,
    producer: &F,
    cacheable: &C,
    key: &K,
) -> (SharedReplay<T>, Option<CacheKey>)
where
    K: Serialize,
    T: Clone + Send + 'static,
    St: Store<SharedReplay<T>>,
    F: Fn(&K) -> P,
    P: Stream<Item = CacheContents<T>> + Send + 'static,
    C: Fn(&K) -> bool,
{
    if !cacheable(key) {
        return (SharedReplay::new(producer(key)), None);
    }

    let cache_key = match CacheKey::from_key(key) {
        Ok(cache_key) => cache_key,
        Err(_) => return (SharedReplay::new(producer(key)), None),
    };

    let unit = match store.get(&cache_key) {
        Some(unit) if !unit.was_cancelled() => {
            tracing::trace!(key = cache_key.metadata(), "replaying cached unit");
            unit
        }
        stale => {
            if stale.is_some() {
                tracing::trace!(key = cache_key.metadata(), "replacing cancelled unit");
            } else {
                tracing::trace!(key = cache_key.metadata(), "cache miss");
            }
            let unit = SharedReplay::new(producer(key));
            store.set(cache_key.clone(), unit.clone());
            unit
        }
    };
    (unit, Some(cache_key))
}

/// Caching adapters for any stream of keys.
///
/// Keys only need to be `Serialize` — their canonical JSON encoding is hashed
/// into the [`CacheKey`] under which results are stored. All operators accept
/// a pluggable backing [`Store`] through their `_with` variant; the plain
/// variants default to a fresh [`InMemoryStore`] owned by the operator chain.
///
/// The flat-map operators spawn producers onto tokio tasks and must run
/// inside a tokio runtime.
pub trait CacheStreamExt: Stream {
    /// Maps keys through `transform`, computing each distinct key at most
    /// once and replaying the stored value for repeats.
    ///
    /// Emits exactly one value per incoming key.
    fn cache_map<V, F>(self, transform: F) -> BoxStream<'static, V>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize,
        F: Fn(&Self::Item) -> V + Send + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.cache_map_with(InMemoryStore::new(), transform, |_: &Self::Item| true)
    }

    /// [`cache_map`](Self::cache_map) with an explicit store and a
    /// `cacheable` predicate.
    ///
    /// Keys the predicate rejects are recomputed on every occurrence and
    /// never touch the store.
    fn cache_map_with<V, St, F, C>(
        self,
        store: St,
        transform: F,
        cacheable: C,
    ) -> BoxStream<'static, V>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize,
        St: Store<V>,
        F: Fn(&Self::Item) -> V + Send + 'static,
        C: Fn(&Self::Item) -> bool + Send + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.map(move |key| {
            if !cacheable(&key) {
                return transform(&key);
            }
            let cache_key = match CacheKey::from_key(&key) {
                Ok(cache_key) => cache_key,
                Err(_) => return transform(&key),
            };
            match store.get(&cache_key) {
                Some(value) => {
                    tracing::trace!(key = cache_key.metadata(), "cache hit");
                    value
                }
                None => {
                    tracing::trace!(key = cache_key.metadata(), "cache miss");
                    let value = transform(&key);
                    store.set(cache_key.clone(), value);
                    // Emit what the store gives back; if persisting failed the
                    // store degrades to a miss and we compute once more.
                    store.get(&cache_key).unwrap_or_else(|| transform(&key))
                }
            }
        })
        .boxed()
    }

    /// Runs the streamed `producer` at most once per distinct key and merges
    /// all active units into the outward stream.
    ///
    /// Repeats of a key replay the unit's buffered history without invoking
    /// the producer again; a producer error is replayed to every later
    /// occurrence of its key.
    fn cache_flat_map<T, F, P>(self, producer: F) -> BoxStream<'static, CacheContents<T>>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize,
        F: Fn(&Self::Item) -> P + Send + 'static,
        P: Stream<Item = CacheContents<T>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        self.cache_flat_map_with(InMemoryStore::new(), producer, |_: &Self::Item| true)
    }

    /// [`cache_flat_map`](Self::cache_flat_map) with an explicit store and a
    /// `cacheable` predicate.
    fn cache_flat_map_with<T, St, F, P, C>(
        self,
        store: St,
        producer: F,
        cacheable: C,
    ) -> BoxStream<'static, CacheContents<T>>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize,
        St: Store<SharedReplay<T>>,
        F: Fn(&Self::Item) -> P + Send + 'static,
        P: Stream<Item = CacheContents<T>> + Send + 'static,
        C: Fn(&Self::Item) -> bool + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        self.map(move |key| {
            lookup_or_insert(&store, &producer, &cacheable, &key)
                .0
                .subscribe()
        })
        .flatten_unordered(None)
        .boxed()
    }

    /// Like [`cache_flat_map`](Self::cache_flat_map), but the outward stream
    /// follows only the most recent key's unit.
    ///
    /// Switching to a new key detaches from the previous unit; if nothing
    /// else observes it, its in-flight producer is cancelled. The store entry
    /// of a cancelled unit is replaced on the key's next occurrence, which
    /// re-invokes the producer.
    fn cache_flat_map_latest<T, F, P>(self, producer: F) -> BoxStream<'static, CacheContents<T>>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize,
        F: Fn(&Self::Item) -> P + Send + 'static,
        P: Stream<Item = CacheContents<T>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        self.cache_flat_map_latest_with(InMemoryStore::new(), producer, |_: &Self::Item| true)
    }

    /// [`cache_flat_map_latest`](Self::cache_flat_map_latest) with an
    /// explicit store and a `cacheable` predicate.
    fn cache_flat_map_latest_with<T, St, F, P, C>(
        self,
        store: St,
        producer: F,
        cacheable: C,
    ) -> BoxStream<'static, CacheContents<T>>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize,
        St: Store<SharedReplay<T>>,
        F: Fn(&Self::Item) -> P + Send + 'static,
        P: Stream<Item = CacheContents<T>> + Send + 'static,
        C: Fn(&Self::Item) -> bool + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let folded = self
            .map(move |key| {
                lookup_or_insert(&store, &producer, &cacheable, &key)
                    .0
                    .subscribe()
            })
            .boxed();
        FlattenLatest::new(folded).boxed()
    }

    /// Caches a producer whose values carry an [`Expiration`], re-validating
    /// on every read.
    ///
    /// A pair read before its deadline emits the value. An expired pair is
    /// discarded: the producer runs again for the same key, the fresh unit
    /// replaces the expired store entry, and validation retries against it.
    /// Expiry is judged when a value is *read*, not when it was produced, so
    /// a value that was valid when written can still trigger a re-fetch.
    fn cache_flat_map_until_expired<T, F, P>(
        self,
        producer: F,
    ) -> BoxStream<'static, CacheContents<T>>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize + Clone + Send + Sync + 'static,
        F: Fn(&Self::Item) -> P + Send + Sync + 'static,
        P: Stream<Item = CacheContents<(T, Expiration)>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        self.cache_flat_map_until_expired_with(InMemoryStore::new(), producer, |_: &Self::Item| {
            true
        })
    }

    /// [`cache_flat_map_until_expired`](Self::cache_flat_map_until_expired)
    /// with an explicit store and a `cacheable` predicate.
    fn cache_flat_map_until_expired_with<T, St, F, P, C>(
        self,
        store: St,
        producer: F,
        cacheable: C,
    ) -> BoxStream<'static, CacheContents<T>>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize + Clone + Send + Sync + 'static,
        St: Store<SharedReplay<(T, Expiration)>>,
        F: Fn(&Self::Item) -> P + Send + Sync + 'static,
        P: Stream<Item = CacheContents<(T, Expiration)>> + Send + 'static,
        C: Fn(&Self::Item) -> bool + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let store = Arc::new(store);
        let producer = Arc::new(producer);
        self.map(move |key| {
            let (unit, cache_key) = lookup_or_insert(&*store, &*producer, &cacheable, &key);
            let refetch = {
                let producer = Arc::clone(&producer);
                Box::new(move || SharedReplay::new((*producer)(&key)))
                    as Box<dyn Fn() -> SharedReplay<(T, Expiration)> + Send>
            };
            Revalidate::new(
                unit.subscribe(),
                refetch,
                cache_key.map(|cache_key| (Arc::clone(&store), cache_key)),
            )
        })
        .flatten_unordered(None)
        .boxed()
    }

    /// The invalidation loop under its historical name; identical to
    /// [`cache_flat_map_until_expired`](Self::cache_flat_map_until_expired).
    fn cache_flat_map_invalidating_on<T, F, P>(
        self,
        producer: F,
    ) -> BoxStream<'static, CacheContents<T>>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize + Clone + Send + Sync + 'static,
        F: Fn(&Self::Item) -> P + Send + Sync + 'static,
        P: Stream<Item = CacheContents<(T, Expiration)>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        self.cache_flat_map_until_expired(producer)
    }

    /// [`cache_flat_map_invalidating_on`](Self::cache_flat_map_invalidating_on)
    /// with an explicit store and a `cacheable` predicate.
    fn cache_flat_map_invalidating_on_with<T, St, F, P, C>(
        self,
        store: St,
        producer: F,
        cacheable: C,
    ) -> BoxStream<'static, CacheContents<T>>
    where
        Self: Sized + Send + 'static,
        Self::Item: Serialize + Clone + Send + Sync + 'static,
        St: Store<SharedReplay<(T, Expiration)>>,
        F: Fn(&Self::Item) -> P + Send + Sync + 'static,
        P: Stream<Item = CacheContents<(T, Expiration)>> + Send + 'static,
        C: Fn(&Self::Item) -> bool + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        self.cache_flat_map_until_expired_with(store, producer, cacheable)
    }
}

impl<St: Stream + ?Sized> CacheStreamExt for St {}
