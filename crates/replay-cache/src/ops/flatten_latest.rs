use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;

/// Flattens a stream of streams, following only the most recent inner stream.
///
/// Whenever the outer stream yields a new inner stream, the previous one is
/// dropped — for replay observers that releases their reference count and
/// cancels a producer nobody else is holding. The flattened stream ends once
/// the outer stream is exhausted and the last inner stream has finished.
pub(crate) struct FlattenLatest<St, In> {
    upstream: Option<St>,
    current: Option<In>,
}

impl<St, In> FlattenLatest<St, In>
where
    St: Stream<Item = In> + Unpin,
    In: Stream + Unpin,
{
    pub(crate) fn new(upstream: St) -> Self {
        FlattenLatest {
            upstream: Some(upstream),
            current: None,
        }
    }
}

impl<St, In> Stream for FlattenLatest<St, In>
where
    St: Stream<Item = In> + Unpin,
    In: Stream + Unpin,
{
    type Item = In::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // Drain the outer stream first so that only the newest inner stream
        // is ever polled; every superseded one is dropped on the spot.
        loop {
            match this.upstream.as_mut() {
                None => break,
                Some(upstream) => match Pin::new(upstream).poll_next(cx) {
                    Poll::Ready(Some(inner)) => this.current = Some(inner),
                    Poll::Ready(None) => this.upstream = None,
                    Poll::Pending => break,
                },
            }
        }

        if let Some(current) = this.current.as_mut() {
            match Pin::new(current).poll_next(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => this.current = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.upstream.is_none() && this.current.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}
