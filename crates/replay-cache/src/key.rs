use std::fmt::{self, Write};
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::CacheContents;

/// The key under which a cache entry is stored.
///
/// A [`CacheKey`] is the SHA-256 digest of the canonical JSON encoding of the
/// caller's key. Hashing gives structurally different keys distinct
/// identities even when their display forms collide (`1` vs `"1"`), and the
/// hex digest doubles as a filesystem-safe file name for the disk stores.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    canonical: Arc<str>,
    hash: [u8; 32],
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_path())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl CacheKey {
    /// Creates a [`CacheKey`] from any serializable key.
    ///
    /// The key is rendered through `serde_json::Value` first, which keeps map
    /// entries in sorted order, so the encoding is stable across runs and
    /// across field declaration order.
    pub fn from_key<K>(key: &K) -> CacheContents<Self>
    where
        K: Serialize + ?Sized,
    {
        let canonical = serde_json::to_value(key)?.to_string();
        let hash = Sha256::digest(canonical.as_bytes());

        Ok(CacheKey {
            canonical: canonical.into(),
            hash: hash.into(),
        })
    }

    /// Returns the human-readable canonical encoding this key was built from.
    pub fn metadata(&self) -> &str {
        &self.canonical
    }

    /// Returns the relative file name for this key: the hex-formatted SHA-256
    /// digest of the canonical encoding.
    pub fn cache_path(&self) -> String {
        let mut path = String::with_capacity(64);
        for b in &self.hash {
            path.write_fmt(format_args!("{b:02x}")).unwrap();
        }
        path
    }
}
