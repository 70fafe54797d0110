use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;

use crate::error::CacheContents;
use crate::expiry::Expiration;
use crate::key::CacheKey;
use crate::replay::{ReplayObserver, SharedReplay};
use crate::store::Store;

/// Validates every `(value, expiration)` pair of a replay observer at read
/// time, re-fetching on expiry.
///
/// An expired pair is discarded; the producer is invoked again for the same
/// key, the fresh unit replaces the expired entry in the store, and
/// validation retries against the fresh observer. This is an explicit loop —
/// a pathologically short TTL burns producer invocations, not stack frames —
/// and it is bounded by the producer itself: a producer error or an empty
/// re-fetch terminates the stream like any other terminal event.
pub(crate) struct Revalidate<T, St> {
    observer: ReplayObserver<(T, Expiration)>,
    refetch: Box<dyn Fn() -> SharedReplay<(T, Expiration)> + Send>,
    store: Option<(Arc<St>, CacheKey)>,
}

impl<T, St> Revalidate<T, St> {
    /// `store` is `None` for non-cacheable keys: re-fetches still happen, but
    /// nothing is recorded.
    pub(crate) fn new(
        observer: ReplayObserver<(T, Expiration)>,
        refetch: Box<dyn Fn() -> SharedReplay<(T, Expiration)> + Send>,
        store: Option<(Arc<St>, CacheKey)>,
    ) -> Self {
        Revalidate {
            observer,
            refetch,
            store,
        }
    }
}

impl<T, St> Stream for Revalidate<T, St>
where
    T: Clone + Send + 'static,
    St: Store<SharedReplay<(T, Expiration)>>,
{
    type Item = CacheContents<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.observer).poll_next(cx) {
                Poll::Ready(Some(Ok((value, expiration)))) => {
                    if expiration.is_expired() {
                        tracing::trace!("cached value expired at read time, re-fetching");
                        let fresh = (this.refetch)();
                        if let Some((store, key)) = &this.store {
                            store.set(key.clone(), fresh.clone());
                        }
                        this.observer = fresh.subscribe();
                        continue;
                    }
                    return Poll::Ready(Some(Ok(value)));
                }
                Poll::Ready(Some(Err(error))) => return Poll::Ready(Some(Err(error))),
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
