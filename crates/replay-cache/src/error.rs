use std::io;

use thiserror::Error;

/// An error surfaced through a cached stream.
///
/// Only the [`Producer`](Self::Producer) variant is ever persisted: it is the
/// terminal error event of a producer and is replayed verbatim to every
/// observer of its key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The per-key producer failed.
    ///
    /// The attached string is the producer's error message. It is stored in
    /// the persisted event log and reconstructed on replay.
    #[error("producer failed: {0}")]
    Producer(String),

    /// An unexpected infrastructure error (I/O, encoding).
    ///
    /// This variant is never persisted. Stores degrade it to a cache miss.
    #[error("internal error")]
    InternalError,
}

impl From<io::Error> for CacheError {
    #[track_caller]
    fn from(err: io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<serde_json::Error> for CacheError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }

    /// The message that goes into a persisted event log.
    ///
    /// Unwraps an already-wrapped producer message so that a disk round-trip
    /// does not nest "producer failed:" prefixes.
    pub(crate) fn message(&self) -> String {
        match self {
            Self::Producer(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// The contents of a cache entry, either `Ok(T)` or the error explaining why
/// the value could not be produced.
pub type CacheContents<T = ()> = Result<T, CacheError>;
