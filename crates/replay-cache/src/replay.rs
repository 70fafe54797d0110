use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::Stream;
use futures::stream::{BoxStream, StreamExt};
use tokio::task::JoinHandle;

use crate::error::{CacheContents, CacheError};
use crate::event::Event;

/// A producer invocation wrapped so that it runs at most once and replays its
/// full event history to any number of observers.
///
/// The producer stream is spawned onto a task when the first observer
/// [`subscribe`](Self::subscribe)s. Every emitted value is buffered for the
/// lifetime of the unit; the first error or the end of the stream is recorded
/// as the terminal event. An observer attaching at any point receives the
/// buffered history in emission order, followed by live events.
///
/// Teardown is reference counted: when the observer count drops from 1 to 0
/// before a terminal event was reached, the producer task is aborted and the
/// unit reports [`was_cancelled`](Self::was_cancelled) from then on. Such a
/// unit never emits again; callers holding one in a store are expected to
/// replace it.
pub struct SharedReplay<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for SharedReplay<T> {
    fn clone(&self) -> Self {
        SharedReplay {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for SharedReplay<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("SharedReplay")
            .field("buffered", &state.buffer.len())
            .field("observers", &state.observers)
            .field("terminated", &state.terminal.is_some())
            .field("cancelled", &state.cancelled)
            .finish()
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
}

struct State<T> {
    /// The producer stream, present until the first subscription starts it.
    source: Option<BoxStream<'static, CacheContents<T>>>,
    task: Option<JoinHandle<()>>,
    buffer: Vec<T>,
    terminal: Option<Terminal>,
    cancelled: bool,
    observers: usize,
    wakers: Vec<Waker>,
    on_complete: Option<Box<dyn FnOnce(Vec<Event<T>>) + Send>>,
}

#[derive(Clone)]
enum Terminal {
    Completed,
    Failed(CacheError),
}

impl<T> State<T> {
    fn wake_all(&mut self) {
        for waker in self.wakers.drain(..) {
            waker.wake();
        }
    }
}

/// Materializes a buffer and terminal event into a persistable history.
fn history<T: Clone>(buffer: &[T], terminal: &Terminal) -> Vec<Event<T>> {
    let mut events: Vec<Event<T>> = buffer.iter().cloned().map(Event::Next).collect();
    match terminal {
        Terminal::Completed => events.push(Event::Completed),
        Terminal::Failed(error) => events.push(Event::Error(error.message())),
    }
    events
}

impl<T> SharedReplay<T>
where
    T: Clone + Send + 'static,
{
    /// Wraps a producer stream. The stream is not polled until the first
    /// observer subscribes.
    pub fn new<S>(producer: S) -> Self
    where
        S: Stream<Item = CacheContents<T>> + Send + 'static,
    {
        SharedReplay {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    source: Some(producer.boxed()),
                    task: None,
                    buffer: Vec::new(),
                    terminal: None,
                    cancelled: false,
                    observers: 0,
                    wakers: Vec::new(),
                    on_complete: None,
                }),
            }),
        }
    }

    /// Rebuilds a unit from a decoded event history.
    ///
    /// The unit has no producer; observers replay the recorded events.
    /// Returns `None` if the history carries no terminal event — a truncated
    /// log would otherwise leave observers waiting forever.
    pub fn from_history(events: Vec<Event<T>>) -> Option<Self> {
        let mut buffer = Vec::new();
        let mut terminal = None;
        for event in events {
            match event {
                Event::Next(value) => buffer.push(value),
                Event::Error(message) => {
                    terminal = Some(Terminal::Failed(CacheError::Producer(message)));
                    break;
                }
                Event::Completed => {
                    terminal = Some(Terminal::Completed);
                    break;
                }
            }
        }

        Some(SharedReplay {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    source: None,
                    task: None,
                    buffer,
                    terminal: Some(terminal?),
                    cancelled: false,
                    observers: 0,
                    wakers: Vec::new(),
                    on_complete: None,
                }),
            }),
        })
    }

    /// Attaches an observer, starting the producer if this is the first one.
    pub fn subscribe(&self) -> ReplayObserver<T> {
        let mut state = self.inner.state.lock().unwrap();
        state.observers += 1;
        if state.task.is_none() && state.terminal.is_none() {
            if let Some(source) = state.source.take() {
                tracing::trace!("starting producer for first observer");
                let inner = Arc::clone(&self.inner);
                state.task = Some(tokio::spawn(drive(inner, source)));
            }
        }
        drop(state);

        ReplayObserver {
            shared: self.clone(),
            pos: 0,
            done: false,
        }
    }

    /// Registers a hook that runs exactly once with the full event history
    /// when the producer reaches its terminal event.
    ///
    /// The hook runs before observers learn about the terminal event, so by
    /// the time the outward stream completes its side effects have happened.
    /// A unit cancelled before its terminal event never runs the hook. If the
    /// unit already terminated, the hook runs immediately.
    pub fn on_complete<F>(&self, hook: F)
    where
        F: FnOnce(Vec<Event<T>>) + Send + 'static,
    {
        let mut state = self.inner.state.lock().unwrap();
        match &state.terminal {
            Some(terminal) => {
                let events = history(&state.buffer, terminal);
                drop(state);
                hook(events);
            }
            None => state.on_complete = Some(Box::new(hook)),
        }
    }

    /// Whether this unit's producer was torn down before terminating.
    pub fn was_cancelled(&self) -> bool {
        self.inner.state.lock().unwrap().cancelled
    }
}

async fn drive<T>(inner: Arc<Inner<T>>, mut source: BoxStream<'static, CacheContents<T>>)
where
    T: Clone + Send + 'static,
{
    loop {
        match source.next().await {
            Some(Ok(value)) => {
                let mut state = inner.state.lock().unwrap();
                state.buffer.push(value);
                state.wake_all();
            }
            Some(Err(error)) => return finish(&inner, Terminal::Failed(error)),
            None => return finish(&inner, Terminal::Completed),
        }
    }
}

/// Runs the completion hook (if any) and only then publishes the terminal
/// event, so that observing completion implies the hook's side effects are
/// done.
fn finish<T>(inner: &Inner<T>, terminal: Terminal)
where
    T: Clone + Send + 'static,
{
    let hook = {
        let mut state = inner.state.lock().unwrap();
        state
            .on_complete
            .take()
            .map(|hook| (hook, history(&state.buffer, &terminal)))
    };
    if let Some((hook, events)) = hook {
        hook(events);
    }

    let mut state = inner.state.lock().unwrap();
    state.terminal = Some(terminal);
    state.wake_all();
}

/// One observer of a [`SharedReplay`] unit.
///
/// Yields the unit's buffered history from the start, then live events. Ends
/// after the terminal event: completion ends the stream, a producer error is
/// yielded once and then ends the stream.
pub struct ReplayObserver<T> {
    shared: SharedReplay<T>,
    pos: usize,
    done: bool,
}

impl<T> Stream for ReplayObserver<T>
where
    T: Clone + Send + 'static,
{
    type Item = CacheContents<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        let mut state = this.shared.inner.state.lock().unwrap();
        if this.pos < state.buffer.len() {
            let value = state.buffer[this.pos].clone();
            this.pos += 1;
            return Poll::Ready(Some(Ok(value)));
        }

        match state.terminal.clone() {
            Some(Terminal::Completed) => {
                this.done = true;
                Poll::Ready(None)
            }
            Some(Terminal::Failed(error)) => {
                this.done = true;
                Poll::Ready(Some(Err(error)))
            }
            None => {
                let waker = cx.waker();
                if !state.wakers.iter().any(|w| w.will_wake(waker)) {
                    state.wakers.push(waker.clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for ReplayObserver<T> {
    fn drop(&mut self) {
        let mut state = self.shared.inner.state.lock().unwrap();
        state.observers -= 1;
        if state.observers == 0 && state.terminal.is_none() {
            if let Some(task) = state.task.take() {
                tracing::trace!("last observer detached, cancelling in-flight producer");
                task.abort();
                state.cancelled = true;
            }
        }
    }
}
