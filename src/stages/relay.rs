//! Bounded relay between a production task and a consumer.
//!
//! A relay decouples how fast elements are produced from how fast they are
//! consumed. A background task stages pending fetches into a fixed ring of
//! slots; the consumer drains the oldest slot. Slot position, not completion
//! time, decides delivery order, so results always come out in the order the
//! work was submitted upstream.

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::core::{Error, Result, Source};
use crate::sync::Signal;

/// One staged unit of work: either an already-resolved pull result or a
/// spawned task still computing its element.
enum Fetch<T> {
    Ready(Result<Option<T>>),
    Spawned(JoinHandle<Result<T>>),
}

impl<T: Send + 'static> Fetch<T> {
    async fn resolve(self) -> Result<Option<T>> {
        match self {
            Fetch::Ready(result) => result,
            Fetch::Spawned(handle) => match handle.await {
                Ok(Ok(value)) => Ok(Some(value)),
                Ok(Err(e)) => Err(e),
                Err(join) => Err(Error::task(join)),
            },
        }
    }
}

struct RelayState<T> {
    slots: Box<[Option<Fetch<T>>]>,
    read: usize,
    write: usize,
    occupancy: usize,
    content: Option<Signal>,
    space: Option<Signal>,
    closed: bool,
}

/// The ring shared between the production task and the consumer handle.
///
/// Occupancy never exceeds capacity; the producer suspends on `space` when
/// the ring is full and the consumer suspends on `content` when it is empty.
struct Relay<T> {
    capacity: usize,
    state: Mutex<RelayState<T>>,
}

impl<T> Relay<T> {
    fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity >= 1, "relay capacity must be at least 1");
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>();
        Arc::new(Self {
            capacity,
            state: Mutex::new(RelayState {
                slots: slots.into_boxed_slice(),
                read: 0,
                write: 0,
                occupancy: 0,
                content: None,
                space: None,
                closed: false,
            }),
        })
    }

    /// Stage one fetch into the next free slot, waiting for space if the
    /// ring is full.
    async fn stage(&self, fetch: Fetch<T>) {
        let mut fetch = Some(fetch);
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                if state.occupancy < self.capacity {
                    let write = state.write;
                    state.slots[write] = fetch.take();
                    state.write = (write + 1) % self.capacity;
                    state.occupancy += 1;
                    if let Some(signal) = state.content.take() {
                        signal.resolve();
                    }
                    return;
                }
                state.space.get_or_insert_with(Signal::new).clone()
            };
            wait.wait().await;
        }
    }

    /// Mark the end of production. Already staged slots stay readable.
    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        if let Some(signal) = state.content.take() {
            signal.resolve();
        }
    }

    /// Take the oldest staged fetch, waiting for content if the ring is
    /// empty. Returns `None` once production has closed and the ring has
    /// drained.
    async fn take(&self) -> Option<Fetch<T>> {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap();
                if state.occupancy > 0 {
                    let read = state.read;
                    let fetch = state.slots[read]
                        .take()
                        .expect("relay slot out of sync with occupancy");
                    state.read = (read + 1) % self.capacity;
                    state.occupancy -= 1;
                    if let Some(signal) = state.space.take() {
                        signal.resolve();
                    }
                    return Some(fetch);
                }
                if state.closed {
                    return None;
                }
                state.content.get_or_insert_with(Signal::new).clone()
            };
            wait.wait().await;
        }
    }
}

/// A stage that runs upstream production ahead of the consumer.
///
/// The production task keeps pulling the upstream source until `capacity`
/// results are waiting; a terminal marker stops production without
/// discarding what is already staged. Capacity 1 is a one-element
/// look-ahead.
pub struct Buffered<T> {
    relay: Arc<Relay<T>>,
    producer: JoinHandle<()>,
    done: bool,
}

impl<T: Send + 'static> Buffered<T> {
    /// Spawn the production task over `source` with the given slot count.
    pub fn new<S>(source: S, capacity: usize) -> Self
    where
        S: Source<Item = T> + Send + 'static,
    {
        let relay = Relay::new(capacity);
        let ring = Arc::clone(&relay);
        let producer = tokio::spawn(async move {
            let mut source = source;
            loop {
                let result = source.pull().await;
                let terminal = matches!(result, Ok(None));
                ring.stage(Fetch::Ready(result)).await;
                if terminal {
                    break;
                }
            }
            tracing::trace!(capacity, "buffered production finished");
            ring.close();
        });
        Self {
            relay,
            producer,
            done: false,
        }
    }
}

#[async_trait]
impl<T: Send + 'static> Source for Buffered<T> {
    type Item = T;

    async fn pull(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        match self.relay.take().await {
            None => {
                self.done = true;
                Ok(None)
            }
            Some(fetch) => {
                let result = fetch.resolve().await;
                if matches!(result, Ok(None)) {
                    self.done = true;
                }
                result
            }
        }
    }
}

impl<T> std::ops::Drop for Buffered<T> {
    fn drop(&mut self) {
        self.producer.abort();
    }
}

/// A stage that applies an asynchronous transform with bounded concurrency.
///
/// Each upstream element's transform is spawned as its own task; up to
/// `capacity` transforms run at once, and results are delivered in upstream
/// order no matter which transforms finish first. A transform failure
/// surfaces only on the pull that owns that element.
pub struct MapConcurrent<U> {
    relay: Arc<Relay<U>>,
    producer: JoinHandle<()>,
    done: bool,
}

impl<U: Send + 'static> MapConcurrent<U> {
    /// Spawn the production task applying `transform` to `source`.
    pub fn new<S, F, Fut>(source: S, capacity: usize, transform: F) -> Self
    where
        S: Source + Send + 'static,
        F: FnMut(S::Item) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        let relay = Relay::new(capacity);
        let ring = Arc::clone(&relay);
        let producer = tokio::spawn(async move {
            let mut source = source;
            let mut transform = transform;
            loop {
                match source.pull().await {
                    Ok(Some(item)) => {
                        let handle = tokio::spawn(transform(item));
                        ring.stage(Fetch::Spawned(handle)).await;
                    }
                    Ok(None) => break,
                    Err(e) => ring.stage(Fetch::Ready(Err(e))).await,
                }
            }
            tracing::trace!(capacity, "concurrent production finished");
            ring.close();
        });
        Self {
            relay,
            producer,
            done: false,
        }
    }
}

#[async_trait]
impl<U: Send + 'static> Source for MapConcurrent<U> {
    type Item = U;

    async fn pull(&mut self) -> Result<Option<U>> {
        if self.done {
            return Ok(None);
        }
        match self.relay.take().await {
            None => {
                self.done = true;
                Ok(None)
            }
            Some(fetch) => fetch.resolve().await,
        }
    }
}

impl<U> std::ops::Drop for MapConcurrent<U> {
    fn drop(&mut self) {
        self.producer.abort();
    }
}
