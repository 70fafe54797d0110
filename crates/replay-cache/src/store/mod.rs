//! The backing store capability and its implementations.
//!
//! A store maps [`CacheKey`]s to entries. The operators treat it as the only
//! piece of shared mutable state: every lookup and insertion happens inside
//! the strictly sequential key fold, which is what makes insert-if-absent
//! race-free without any locking discipline beyond the store's own.

use std::sync::Arc;

use crate::key::CacheKey;

mod disk;
mod memory;

pub use disk::{DiskReplayStore, DiskStore};
pub use memory::InMemoryStore;

/// A pluggable backing store for cache entries.
///
/// `set` on an existing key is reserved for explicit invalidation-triggered
/// recomputation (an expired or cancelled entry being replaced); the
/// operators never overwrite a live entry otherwise.
///
/// Store failures are not part of the signature: implementations degrade
/// every infrastructure problem to a miss.
pub trait Store<T>: Send + Sync + 'static {
    /// Looks up the entry for `key`.
    fn get(&self, key: &CacheKey) -> Option<T>;

    /// Records the entry for `key`.
    fn set(&self, key: CacheKey, value: T);

    /// Drops all entries.
    fn reset(&self);
}

impl<T, S> Store<T> for Arc<S>
where
    S: Store<T> + ?Sized,
{
    fn get(&self, key: &CacheKey) -> Option<T> {
        (**self).get(key)
    }

    fn set(&self, key: CacheKey, value: T) {
        (**self).set(key, value)
    }

    fn reset(&self) {
        (**self).reset()
    }
}
