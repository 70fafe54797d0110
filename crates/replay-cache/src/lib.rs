//! # replay-cache
//!
//! A key-addressed memoization layer for asynchronous and streamed
//! computations. Given a stream of incoming keys, an expensive per-key
//! producer runs at most once per key; later occurrences of the same key
//! replay the recorded result instead of recomputing it. On top of that the
//! crate supports latest-wins cancellation, read-time TTL invalidation, and
//! optional persistence so cache hits survive process restarts.
//!
//! ## The Shared Replay Unit
//!
//! The building block is the [`SharedReplay`] unit: one producer invocation,
//! wrapped so it executes once, buffers everything it emits, and replays the
//! full history in order to any number of observers — including observers
//! that attach long after emission began. Teardown is reference counted:
//! when the last observer of a unit detaches before the producer finished,
//! the producer task is aborted. This is what gives
//! [`cache_flat_map_latest`](CacheStreamExt::cache_flat_map_latest) its
//! switch-and-cancel semantics without affecting units other keys hold.
//!
//! ## Operators
//!
//! [`CacheStreamExt`] adds the caching operators to any stream of keys:
//!
//! - [`cache_map`](CacheStreamExt::cache_map): synchronous transform,
//!   computed once per distinct key.
//! - [`cache_flat_map`](CacheStreamExt::cache_flat_map): streamed producer,
//!   one unit per distinct key, all units merged concurrently.
//! - [`cache_flat_map_latest`](CacheStreamExt::cache_flat_map_latest): same
//!   caching policy, but the outward stream follows only the newest key and
//!   cancels the producer it switches away from.
//! - [`cache_flat_map_until_expired`](CacheStreamExt::cache_flat_map_until_expired):
//!   producers emit `(value, Expiration)` pairs; every read re-validates and
//!   an expired value triggers a re-fetch that replaces the cached unit.
//!
//! Each operator processes keys strictly sequentially — a key's store lookup
//! and insertion complete before the next key is examined — which makes the
//! insert-if-absent discipline race-free by construction. Producers
//! themselves run concurrently on tokio tasks, and ordering is only
//! guaranteed per key, never across keys.
//!
//! ## Backing stores
//!
//! All operators take an optional [`Store`], defaulting to an in-memory map
//! per operator chain ([`InMemoryStore`]). [`DiskStore`] persists plain
//! values; [`DiskReplayStore`] persists a producer's entire event history as
//! a JSON event log under a content-addressed file name (the SHA-256 of the
//! canonical key encoding, see [`CacheKey`]), and reconstructs replayable
//! units from it in a fresh process.
//!
//! ## Errors
//!
//! A producer failure is data: it terminates the unit, is recorded in the
//! event history, persisted, and replayed to every observer of that key as
//! [`CacheError::Producer`]. Infrastructure failures (I/O, encoding) are
//! never surfaced through the stream — stores log them and degrade to a
//! cache miss, falling back to recomputation.

mod error;
mod event;
mod expiry;
mod key;
mod ops;
mod replay;
mod store;

#[cfg(test)]
mod tests;

pub use error::{CacheContents, CacheError};
pub use event::Event;
pub use expiry::Expiration;
pub use key::CacheKey;
pub use ops::CacheStreamExt;
pub use replay::{ReplayObserver, SharedReplay};
pub use store::{DiskReplayStore, DiskStore, InMemoryStore, Store};
