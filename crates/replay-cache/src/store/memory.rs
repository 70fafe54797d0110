use std::sync::Mutex;

use rustc_hash::FxHashMap;

use crate::key::CacheKey;
use crate::store::Store;

/// The default backing store: an unbounded in-memory map.
#[derive(Debug)]
pub struct InMemoryStore<T> {
    entries: Mutex<FxHashMap<CacheKey, T>>,
}

impl<T> Default for InMemoryStore<T> {
    fn default() -> Self {
        InMemoryStore {
            entries: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T> Store<T> for InMemoryStore<T>
where
    T: Clone + Send + 'static,
{
    fn get(&self, key: &CacheKey) -> Option<T> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: CacheKey, value: T) {
        self.entries.lock().unwrap().insert(key, value);
    }

    fn reset(&self) {
        self.entries.lock().unwrap().clear();
    }
}
