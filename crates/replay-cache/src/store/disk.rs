use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::Event;
use crate::key::CacheKey;
use crate::replay::SharedReplay;
use crate::store::Store;

/// Namespace prefix for cache root directories: `<root>/<namespace>.<id>/`.
const STORE_NAMESPACE: &str = "replay-cache";

/// A disk-backed store for plain values.
///
/// One file per key under `<root>/replay-cache.<id>/`, named by the key's hex
/// digest and containing the JSON encoding of the value. Writes go through a
/// temp file in the same directory and are persisted atomically. Any I/O or
/// decode failure degrades to a miss.
#[derive(Debug)]
pub struct DiskStore<V> {
    root: PathBuf,
    _entry: PhantomData<fn() -> V>,
}

impl<V> DiskStore<V> {
    /// A store rooted in the system temp directory.
    pub fn new(id: &str) -> Self {
        Self::with_root(std::env::temp_dir(), id)
    }

    /// A store rooted in `root`, e.g. a test-owned temp directory.
    pub fn with_root(root: impl AsRef<Path>, id: &str) -> Self {
        DiskStore {
            root: cache_root(root.as_ref(), id),
            _entry: PhantomData,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl<V> Store<V> for DiskStore<V>
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn get(&self, key: &CacheKey) -> Option<V> {
        read_json(&self.root, key)
    }

    fn set(&self, key: CacheKey, value: V) {
        if let Err(e) = write_json(&self.root, &key, &value) {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                key = key.metadata(),
                "Failed to persist cache value",
            );
        }
    }

    fn reset(&self) {
        remove_root(&self.root);
    }
}

/// A disk-backed store for shared replay units.
///
/// `set` attaches the persistence side effect to the unit: when the producer
/// reaches its terminal event, the full event history is written to the
/// content-addressed file. A unit cancelled in flight never writes. The live
/// unit is also recorded in a write registry so that the first read after the
/// write observes the unit itself (with the side effect still armed) instead
/// of a stale file; a registry entry is served at most once.
///
/// `get` resolves, in order: the write registry, the in-memory mirror of
/// previously read histories, and finally the disk. A history read from disk
/// is promoted into the mirror so later reads skip the file system.
pub struct DiskReplayStore<V> {
    root: PathBuf,
    writes: Mutex<FxHashMap<CacheKey, SharedReplay<V>>>,
    memory: Mutex<FxHashMap<CacheKey, SharedReplay<V>>>,
}

impl<V> DiskReplayStore<V> {
    /// A store rooted in the system temp directory.
    pub fn new(id: &str) -> Self {
        Self::with_root(std::env::temp_dir(), id)
    }

    /// A store rooted in `root`, e.g. a test-owned temp directory.
    pub fn with_root(root: impl AsRef<Path>, id: &str) -> Self {
        DiskReplayStore {
            root: cache_root(root.as_ref(), id),
            writes: Mutex::new(FxHashMap::default()),
            memory: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl<V> Store<SharedReplay<V>> for DiskReplayStore<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn get(&self, key: &CacheKey) -> Option<SharedReplay<V>> {
        if let Some(write) = self.writes.lock().unwrap().remove(key) {
            tracing::trace!(key = key.metadata(), "serving first read after write");
            return Some(write);
        }

        if let Some(unit) = self.memory.lock().unwrap().get(key).cloned() {
            tracing::trace!(key = key.metadata(), "serving promoted history");
            return Some(unit);
        }

        let events: Vec<Event<V>> = read_json(&self.root, key)?;
        let unit = match SharedReplay::from_history(events) {
            Some(unit) => unit,
            None => {
                tracing::error!(
                    key = key.metadata(),
                    "Persisted history has no terminal event",
                );
                return None;
            }
        };
        tracing::trace!(key = key.metadata(), "promoting persisted history");
        self.memory
            .lock()
            .unwrap()
            .insert(key.clone(), unit.clone());
        Some(unit)
    }

    fn set(&self, key: CacheKey, unit: SharedReplay<V>) {
        let root = self.root.clone();
        let hook_key = key.clone();
        unit.on_complete(move |events| {
            if let Err(e) = write_json(&root, &hook_key, &events) {
                tracing::error!(
                    error = &e as &dyn std::error::Error,
                    key = hook_key.metadata(),
                    "Failed to persist event history",
                );
            }
        });
        self.writes.lock().unwrap().insert(key, unit);
    }

    fn reset(&self) {
        self.writes.lock().unwrap().clear();
        self.memory.lock().unwrap().clear();
        remove_root(&self.root);
    }
}

fn cache_root(root: &Path, id: &str) -> PathBuf {
    root.join(format!("{STORE_NAMESPACE}.{id}"))
}

fn read_json<V: DeserializeOwned>(root: &Path, key: &CacheKey) -> Option<V> {
    let path = root.join(key.cache_path());
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %path.display(),
                "Failed to read cache file",
            );
            return None;
        }
    };

    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %path.display(),
                "Failed to decode cache file",
            );
            None
        }
    }
}

fn write_json<V: Serialize>(root: &Path, key: &CacheKey, value: &V) -> io::Result<()> {
    std::fs::create_dir_all(root)?;
    let mut temp_file = tempfile::Builder::new().prefix("tmp").tempfile_in(root)?;
    serde_json::to_writer(temp_file.as_file_mut(), value)?;
    temp_file
        .persist(root.join(key.cache_path()))
        .map_err(|e| e.error)?;
    Ok(())
}

fn remove_root(root: &Path) {
    if let Err(e) = std::fs::remove_dir_all(root) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                path = %root.display(),
                "Failed to remove cache directory",
            );
        }
    }
}
