use std::time::Duration;

use tokio::time::Instant;

/// The point in time after which a cached value no longer counts as valid.
///
/// Validity is judged at *read* time: a value carrying an expiration that was
/// comfortably in the future when it was produced can still be judged expired
/// by the observer that finally reads it. Built on the tokio clock so that
/// expiry scenarios can run under `tokio::time::pause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Expiration(Instant);

impl Expiration {
    /// An expiration at the given instant.
    pub fn at(deadline: Instant) -> Self {
        Expiration(deadline)
    }

    /// An expiration `ttl` from now.
    pub fn after(ttl: Duration) -> Self {
        Expiration(Instant::now() + ttl)
    }

    /// Whether the deadline has passed. A value is valid up to and including
    /// its deadline.
    pub fn is_expired(self) -> bool {
        self.0 < Instant::now()
    }

    /// The underlying deadline.
    pub fn deadline(self) -> Instant {
        self.0
    }
}
