//! Helpers for testing cache operators and stores.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - Call [`setup`] first when a test's tracing output matters. This sets up
//!    the logger so that console output is captured by the test runner.
//!
//!  - When using [`tempdir`], hold the handle for the entire lifetime of the
//!    test. When dropped too early, the directory is deleted while a store
//!    may still lazily recreate it, silently leaking files. Assign it to a
//!    variable in the test function (e.g. `let _cache_dir = tempdir()`).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: the logger only captures logs from the
///    `replay-cache` crate and mutes everything else.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("replay_cache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it
/// as a guard to automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Counts how often a producer was invoked.
#[derive(Debug, Default, Clone)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one invocation and returns the count before it.
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
