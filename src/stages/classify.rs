//! Ordered concurrent classification.
//!
//! The stages in this module test elements with an asynchronous predicate
//! while keeping several tests in flight at once. A coordinator task owns
//! the upstream source and all mutable stage state; requests arrive on its
//! mailbox and are answered strictly in the order they were issued, no
//! matter which tests finish first. Skipped elements are replaced eagerly,
//! so one external pull may consume several upstream elements before it
//! resolves.

use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::{Error, PendingPull, Result, Source};
use crate::sync::Fifo;

type ReplyTx<T> = oneshot::Sender<Result<Option<T>>>;

/// The in-order fate of one classified element.
enum Verdict {
    /// Release the element to the requesting caller.
    Emit,
    /// Discard the element and classify a replacement.
    Skip,
    /// Discard the element and end the stream permanently.
    Halt,
}

/// A classification policy: how to test one element and how to commit the
/// decision once the element's turn comes up.
///
/// `dispatch` runs as soon as the element is pulled, possibly for several
/// elements at once. `commit` runs strictly in element order and is the only
/// place shared state (flags, seen-sets) may change; a failed element's
/// error is returned without committing anything.
trait Classifier<T>: Send {
    fn dispatch(&mut self, element: &T, index: u64) -> Option<JoinHandle<Result<bool>>>;

    fn commit(&mut self, outcome: Option<Result<bool>>, element: &T, index: u64)
        -> Result<Verdict>;
}

/// One dispatched upstream pull awaiting its turn.
enum Pending<T> {
    Element {
        element: T,
        index: u64,
        test: Option<JoinHandle<Result<bool>>>,
    },
    Terminal,
    Failed(Error),
}

/// Outcome of waiting for the front pending entry to become decidable.
enum FrontOutcome {
    Tested(Result<bool>),
    Untested,
}

enum Step<T> {
    Request(Option<ReplyTx<T>>),
    Settle(FrontOutcome),
}

struct ClassifyActor<S: Source, C> {
    source: S,
    classifier: C,
    rx: mpsc::UnboundedReceiver<ReplyTx<S::Item>>,
    pending: Fifo<Pending<S::Item>>,
    waiters: Fifo<ReplyTx<S::Item>>,
    upstream_done: bool,
    terminal: bool,
    next_index: u64,
}

impl<S, C> ClassifyActor<S, C>
where
    S: Source,
    C: Classifier<S::Item>,
{
    async fn run(mut self) {
        loop {
            while self.wants_dispatch() {
                self.dispatch().await;
            }

            let step = {
                let Self {
                    rx,
                    pending,
                    waiters,
                    terminal,
                    ..
                } = &mut self;
                let can_settle = !*terminal && !waiters.is_empty() && !pending.is_empty();
                tokio::select! {
                    request = rx.recv() => Step::Request(request),
                    outcome = front_outcome(pending), if can_settle => Step::Settle(outcome),
                }
            };

            match step {
                Step::Request(None) => break,
                Step::Request(Some(reply)) => self.on_request(reply),
                Step::Settle(outcome) => self.settle(outcome),
            }
        }
        self.abort_pending();
    }

    /// Every queued request needs one dispatched element ahead of it.
    fn wants_dispatch(&self) -> bool {
        !self.terminal && !self.upstream_done && self.waiters.len() > self.pending.len()
    }

    /// Pull the next raw element and launch its test without waiting for
    /// any earlier element's decision.
    async fn dispatch(&mut self) {
        match self.source.pull().await {
            Ok(Some(element)) => {
                let index = self.next_index;
                self.next_index += 1;
                let test = self.classifier.dispatch(&element, index);
                tracing::trace!(index, tested = test.is_some(), "classification dispatched");
                self.pending.enqueue(Pending::Element {
                    element,
                    index,
                    test,
                });
            }
            Ok(None) => {
                self.upstream_done = true;
                self.pending.enqueue(Pending::Terminal);
            }
            Err(e) => self.pending.enqueue(Pending::Failed(e)),
        }
    }

    fn on_request(&mut self, reply: ReplyTx<S::Item>) {
        if self.terminal {
            let _ = reply.send(Ok(None));
            return;
        }
        self.waiters.enqueue(reply);
    }

    /// Decide the front element's fate on behalf of the front waiter.
    fn settle(&mut self, outcome: FrontOutcome) {
        match self.pending.dequeue() {
            Pending::Terminal => self.finish(),
            Pending::Failed(e) => {
                let _ = self.waiters.dequeue().send(Err(e));
            }
            Pending::Element { element, index, .. } => {
                let tested = match outcome {
                    FrontOutcome::Tested(result) => Some(result),
                    FrontOutcome::Untested => None,
                };
                match self.classifier.commit(tested, &element, index) {
                    Ok(Verdict::Emit) => {
                        let _ = self.waiters.dequeue().send(Ok(Some(element)));
                    }
                    Ok(Verdict::Skip) => {
                        // The front waiter is still unserved; the dispatch
                        // deficit replaces the discarded element on the next
                        // loop turn.
                        tracing::trace!(index, "element skipped");
                    }
                    Ok(Verdict::Halt) => {
                        tracing::debug!(index, "classification halted the stream");
                        self.finish();
                    }
                    Err(e) => {
                        let _ = self.waiters.dequeue().send(Err(e));
                    }
                }
            }
        }
    }

    /// End of stream: every queued and future request resolves terminal.
    fn finish(&mut self) {
        self.terminal = true;
        self.upstream_done = true;
        self.abort_pending();
        while !self.waiters.is_empty() {
            let _ = self.waiters.dequeue().send(Ok(None));
        }
    }

    fn abort_pending(&mut self) {
        while !self.pending.is_empty() {
            if let Pending::Element {
                test: Some(handle), ..
            } = self.pending.dequeue()
            {
                handle.abort();
            }
        }
    }
}

async fn front_outcome<T>(pending: &mut Fifo<Pending<T>>) -> FrontOutcome {
    match pending.peek_front_mut() {
        Some(Pending::Element {
            test: Some(handle), ..
        }) => FrontOutcome::Tested(match handle.await {
            Ok(result) => result,
            Err(join) => Err(Error::task(join)),
        }),
        _ => FrontOutcome::Untested,
    }
}

/// Shared handle to a classification coordinator.
struct ClassifyHandle<T> {
    tx: mpsc::UnboundedSender<ReplyTx<T>>,
    done: bool,
}

impl<T: Send + 'static> ClassifyHandle<T> {
    fn spawn<S, C>(source: S, classifier: C) -> Self
    where
        S: Source<Item = T> + Send + 'static,
        C: Classifier<T> + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = ClassifyActor {
            source,
            classifier,
            rx,
            pending: Fifo::new(),
            waiters: Fifo::new(),
            upstream_done: false,
            terminal: false,
            next_index: 0,
        };
        tokio::spawn(actor.run());
        Self { tx, done: false }
    }

    fn request(&self) -> PendingPull<T> {
        let (reply, receiver) = oneshot::channel();
        if self.tx.send(reply).is_err() {
            return PendingPull::closed();
        }
        PendingPull::new(receiver)
    }

    async fn pull(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        let result = self.request().await;
        if matches!(result, Ok(None)) {
            self.done = true;
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Filter

struct FilterPolicy<P, Fut> {
    predicate: P,
    _future: PhantomData<fn() -> Fut>,
}

impl<T, P, Fut> Classifier<T> for FilterPolicy<P, Fut>
where
    T: Send + 'static,
    P: FnMut(&T) -> Fut + Send,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    fn dispatch(&mut self, element: &T, _index: u64) -> Option<JoinHandle<Result<bool>>> {
        Some(tokio::spawn((self.predicate)(element)))
    }

    fn commit(
        &mut self,
        outcome: Option<Result<bool>>,
        _element: &T,
        _index: u64,
    ) -> Result<Verdict> {
        match outcome {
            Some(Ok(true)) | None => Ok(Verdict::Emit),
            Some(Ok(false)) => Ok(Verdict::Skip),
            Some(Err(e)) => Err(e),
        }
    }
}

/// Keeps only elements satisfying an asynchronous predicate, in order.
pub struct Filter<T> {
    handle: ClassifyHandle<T>,
}

impl<T: Send + 'static> Filter<T> {
    pub fn new<S, P, Fut>(source: S, predicate: P) -> Self
    where
        S: Source<Item = T> + Send + 'static,
        P: FnMut(&T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Self {
            handle: ClassifyHandle::spawn(
                source,
                FilterPolicy {
                    predicate,
                    _future: PhantomData,
                },
            ),
        }
    }

    /// Issue a pull without waiting for earlier pulls to resolve. Results
    /// resolve in request order.
    pub fn request(&self) -> PendingPull<T> {
        self.handle.request()
    }
}

#[async_trait]
impl<T: Send + 'static> Source for Filter<T> {
    type Item = T;

    async fn pull(&mut self) -> Result<Option<T>> {
        self.handle.pull().await
    }
}

// ---------------------------------------------------------------------------
// TakeWhile

struct TakeWhilePolicy<P, Fut> {
    predicate: P,
    active: bool,
    _future: PhantomData<fn() -> Fut>,
}

impl<T, P, Fut> Classifier<T> for TakeWhilePolicy<P, Fut>
where
    T: Send + 'static,
    P: FnMut(&T) -> Fut + Send,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    fn dispatch(&mut self, element: &T, _index: u64) -> Option<JoinHandle<Result<bool>>> {
        if !self.active {
            return None;
        }
        Some(tokio::spawn((self.predicate)(element)))
    }

    fn commit(
        &mut self,
        outcome: Option<Result<bool>>,
        _element: &T,
        _index: u64,
    ) -> Result<Verdict> {
        match outcome {
            Some(Ok(true)) | None => Ok(Verdict::Emit),
            Some(Ok(false)) => {
                self.active = false;
                Ok(Verdict::Halt)
            }
            // The flag stays untouched; the element counts as undecided.
            Some(Err(e)) => Err(e),
        }
    }
}

/// Yields the longest prefix of elements satisfying a predicate; the first
/// failing element ends the stream for every outstanding and future pull.
pub struct TakeWhile<T> {
    handle: ClassifyHandle<T>,
}

impl<T: Send + 'static> TakeWhile<T> {
    pub fn new<S, P, Fut>(source: S, predicate: P) -> Self
    where
        S: Source<Item = T> + Send + 'static,
        P: FnMut(&T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Self {
            handle: ClassifyHandle::spawn(
                source,
                TakeWhilePolicy {
                    predicate,
                    active: true,
                    _future: PhantomData,
                },
            ),
        }
    }

    /// Issue a pull without waiting for earlier pulls to resolve.
    pub fn request(&self) -> PendingPull<T> {
        self.handle.request()
    }
}

#[async_trait]
impl<T: Send + 'static> Source for TakeWhile<T> {
    type Item = T;

    async fn pull(&mut self) -> Result<Option<T>> {
        self.handle.pull().await
    }
}

// ---------------------------------------------------------------------------
// DropWhile

struct DropWhilePolicy<P, Fut> {
    predicate: P,
    dropping: bool,
    _future: PhantomData<fn() -> Fut>,
}

impl<T, P, Fut> Classifier<T> for DropWhilePolicy<P, Fut>
where
    T: Send + 'static,
    P: FnMut(&T) -> Fut + Send,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    fn dispatch(&mut self, element: &T, _index: u64) -> Option<JoinHandle<Result<bool>>> {
        if !self.dropping {
            return None;
        }
        Some(tokio::spawn((self.predicate)(element)))
    }

    fn commit(
        &mut self,
        outcome: Option<Result<bool>>,
        _element: &T,
        _index: u64,
    ) -> Result<Verdict> {
        if !self.dropping {
            // The prefix ended at a lower index; a stale test result for
            // this element no longer matters.
            return Ok(Verdict::Emit);
        }
        match outcome {
            Some(Ok(true)) => Ok(Verdict::Skip),
            Some(Ok(false)) | None => {
                self.dropping = false;
                Ok(Verdict::Emit)
            }
            Some(Err(e)) => Err(e),
        }
    }
}

/// Discards the longest prefix of elements satisfying a predicate, then
/// yields everything after it.
pub struct DropWhile<T> {
    handle: ClassifyHandle<T>,
}

impl<T: Send + 'static> DropWhile<T> {
    pub fn new<S, P, Fut>(source: S, predicate: P) -> Self
    where
        S: Source<Item = T> + Send + 'static,
        P: FnMut(&T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        Self {
            handle: ClassifyHandle::spawn(
                source,
                DropWhilePolicy {
                    predicate,
                    dropping: true,
                    _future: PhantomData,
                },
            ),
        }
    }

    /// Issue a pull without waiting for earlier pulls to resolve.
    pub fn request(&self) -> PendingPull<T> {
        self.handle.request()
    }
}

#[async_trait]
impl<T: Send + 'static> Source for DropWhile<T> {
    type Item = T;

    async fn pull(&mut self) -> Result<Option<T>> {
        self.handle.pull().await
    }
}

// ---------------------------------------------------------------------------
// Unique

struct UniquePolicy<T> {
    seen: HashSet<T>,
}

impl<T> Classifier<T> for UniquePolicy<T>
where
    T: Send + Hash + Eq + Clone + 'static,
{
    fn dispatch(&mut self, _element: &T, _index: u64) -> Option<JoinHandle<Result<bool>>> {
        // Membership is checked on the element's turn: a lookup made at
        // dispatch time could be invalidated by an earlier element's insert.
        None
    }

    fn commit(
        &mut self,
        _outcome: Option<Result<bool>>,
        element: &T,
        _index: u64,
    ) -> Result<Verdict> {
        if self.seen.insert(element.clone()) {
            Ok(Verdict::Emit)
        } else {
            Ok(Verdict::Skip)
        }
    }
}

/// Yields only the first occurrence of each element, preserving order.
///
/// Keeps every yielded element in memory for the lifetime of the stage.
pub struct Unique<T> {
    handle: ClassifyHandle<T>,
}

impl<T: Send + Hash + Eq + Clone + 'static> Unique<T> {
    pub fn new<S>(source: S) -> Self
    where
        S: Source<Item = T> + Send + 'static,
    {
        Self {
            handle: ClassifyHandle::spawn(source, UniquePolicy { seen: HashSet::new() }),
        }
    }

    /// Issue a pull without waiting for earlier pulls to resolve.
    pub fn request(&self) -> PendingPull<T> {
        self.handle.request()
    }
}

#[async_trait]
impl<T: Send + Hash + Eq + Clone + 'static> Source for Unique<T> {
    type Item = T;

    async fn pull(&mut self) -> Result<Option<T>> {
        self.handle.pull().await
    }
}
