//! Fan-out of one pull source into two independently pulled sources.
//!
//! A coordinator task owns the upstream and advances it by exactly one
//! element per dispatch, routing each element to a left or right queue.
//! Requests from both sides land on the same mailbox, so concurrent pulls
//! share the coordinator's single in-flight dispatch instead of fetching
//! the upstream twice.
//!
//! Elements routed to a side that is not being drained accumulate in that
//! side's queue without bound; draining one side exhaustively before the
//! other may buffer the entire unread remainder in memory.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::core::{PendingPull, Result, Source};
use crate::sync::Fifo;

type ReplyTx<T> = oneshot::Sender<Result<Option<T>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

enum Route {
    Left,
    Right,
}

/// Routing policy applied to each dispatched element, in upstream order.
#[async_trait]
trait Router<T: Send>: Send {
    /// Decide which side one element belongs to, returning the element with
    /// the decision.
    async fn route(&mut self, element: T) -> Result<(T, Route)>;

    /// Whether the left side is permanently closed (boundary crossed).
    fn left_closed(&self) -> bool {
        false
    }
}

struct FanRequest<T> {
    side: Side,
    reply: ReplyTx<T>,
}

struct FanOutActor<S: Source, R> {
    source: S,
    router: R,
    rx: mpsc::UnboundedReceiver<FanRequest<S::Item>>,
    left: Fifo<S::Item>,
    right: Fifo<S::Item>,
    left_waiters: Fifo<ReplyTx<S::Item>>,
    right_waiters: Fifo<ReplyTx<S::Item>>,
    upstream_done: bool,
}

impl<S, R> FanOutActor<S, R>
where
    S: Source,
    R: Router<S::Item>,
{
    async fn run(mut self) {
        loop {
            while let Ok(request) = self.rx.try_recv() {
                self.register(request);
            }
            self.serve();
            if let Some(side) = self.starved() {
                self.dispatch(side).await;
                continue;
            }
            match self.rx.recv().await {
                Some(request) => self.register(request),
                None => break,
            }
        }
    }

    fn register(&mut self, request: FanRequest<S::Item>) {
        match request.side {
            Side::Left => self.left_waiters.enqueue(request.reply),
            Side::Right => self.right_waiters.enqueue(request.reply),
        }
    }

    /// Answer every waiter whose queue has an element or whose side has
    /// terminated.
    fn serve(&mut self) {
        while !self.left_waiters.is_empty() {
            if !self.left.is_empty() {
                let element = self.left.dequeue();
                let _ = self.left_waiters.dequeue().send(Ok(Some(element)));
            } else if self.upstream_done || self.router.left_closed() {
                let _ = self.left_waiters.dequeue().send(Ok(None));
            } else {
                break;
            }
        }
        while !self.right_waiters.is_empty() {
            if !self.right.is_empty() {
                let element = self.right.dequeue();
                let _ = self.right_waiters.dequeue().send(Ok(Some(element)));
            } else if self.upstream_done {
                let _ = self.right_waiters.dequeue().send(Ok(None));
            } else {
                break;
            }
        }
    }

    /// The side whose front waiter needs a dispatch to make progress.
    fn starved(&self) -> Option<Side> {
        if self.upstream_done {
            return None;
        }
        if !self.left_waiters.is_empty() && self.left.is_empty() && !self.router.left_closed() {
            return Some(Side::Left);
        }
        if !self.right_waiters.is_empty() && self.right.is_empty() {
            return Some(Side::Right);
        }
        None
    }

    /// Advance the shared upstream cursor by one element and route it.
    ///
    /// A routing error goes to the waiter the dispatch was made for; the
    /// pulled element is discarded with it.
    async fn dispatch(&mut self, for_side: Side) {
        match self.source.pull().await {
            Ok(Some(element)) => match self.router.route(element).await {
                Ok((element, Route::Left)) => {
                    tracing::trace!("element routed left");
                    self.left.enqueue(element);
                }
                Ok((element, Route::Right)) => {
                    tracing::trace!("element routed right");
                    self.right.enqueue(element);
                }
                Err(e) => {
                    let _ = self.waiters(for_side).dequeue().send(Err(e));
                }
            },
            Ok(None) => {
                tracing::trace!("fan-out upstream exhausted");
                self.upstream_done = true;
            }
            Err(e) => {
                let _ = self.waiters(for_side).dequeue().send(Err(e));
            }
        }
    }

    fn waiters(&mut self, side: Side) -> &mut Fifo<ReplyTx<S::Item>> {
        match side {
            Side::Left => &mut self.left_waiters,
            Side::Right => &mut self.right_waiters,
        }
    }
}

/// One independently drainable side of a fan-out.
pub struct FanSide<T> {
    side: Side,
    tx: mpsc::UnboundedSender<FanRequest<T>>,
    done: bool,
}

impl<T: Send + 'static> FanSide<T> {
    /// Issue a pull without waiting for earlier pulls on this side to
    /// resolve. Results resolve in request order.
    pub fn request(&self) -> PendingPull<T> {
        let (reply, receiver) = oneshot::channel();
        let request = FanRequest {
            side: self.side,
            reply,
        };
        if self.tx.send(request).is_err() {
            return PendingPull::closed();
        }
        PendingPull::new(receiver)
    }
}

#[async_trait]
impl<T: Send + 'static> Source for FanSide<T> {
    type Item = T;

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

fn spawn_fanout<S, R>(source: S, router: R) -> (FanSide<S::Item>, FanSide<S::Item>)
where
    S: Source + Send + 'static,
    R: Router<S::Item> + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let actor = FanOutActor {
        source,
        router,
        rx,
        left: Fifo::new(),
        right: Fifo::new(),
        left_waiters: Fifo::new(),
        right_waiters: Fifo::new(),
        upstream_done: false,
    };
    tokio::spawn(actor.run());
    (
        FanSide {
            side: Side::Left,
            tx: tx.clone(),
            done: false,
        },
        FanSide {
            side: Side::Right,
            tx,
            done: false,
        },
    )
}

// ---------------------------------------------------------------------------
// Partition

struct PartitionRouter<P, Fut> {
    predicate: P,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<T, P, Fut> Router<T> for PartitionRouter<P, Fut>
where
    T: Send + 'static,
    P: FnMut(&T) -> Fut + Send,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    async fn route(&mut self, element: T) -> Result<(T, Route)> {
        let test = (self.predicate)(&element);
        if test.await? {
            Ok((element, Route::Left))
        } else {
            Ok((element, Route::Right))
        }
    }
}

/// Split a source into elements satisfying a predicate (left) and the rest
/// (right). Both sides run until the upstream is exhausted.
pub fn partition<S, P, Fut>(source: S, predicate: P) -> (FanSide<S::Item>, FanSide<S::Item>)
where
    S: Source + Send + 'static,
    P: FnMut(&S::Item) -> Fut + Send + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    spawn_fanout(
        source,
        PartitionRouter {
            predicate,
            _future: PhantomData,
        },
    )
}

// ---------------------------------------------------------------------------
// SplitAt

struct SplitAtRouter {
    remaining: usize,
}

#[async_trait]
impl<T: Send + 'static> Router<T> for SplitAtRouter {
    async fn route(&mut self, element: T) -> Result<(T, Route)> {
        if self.remaining > 0 {
            self.remaining -= 1;
            Ok((element, Route::Left))
        } else {
            Ok((element, Route::Right))
        }
    }

    fn left_closed(&self) -> bool {
        self.remaining == 0
    }
}

/// Split a source into its first `index` elements (left) and the remainder
/// (right). Once the boundary is crossed the left side is permanently
/// terminal.
pub fn split_at<S>(source: S, index: usize) -> (FanSide<S::Item>, FanSide<S::Item>)
where
    S: Source + Send + 'static,
{
    spawn_fanout(source, SplitAtRouter { remaining: index })
}

// ---------------------------------------------------------------------------
// Span

struct SpanRouter<P, Fut> {
    predicate: P,
    closed: bool,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<T, P, Fut> Router<T> for SpanRouter<P, Fut>
where
    T: Send + 'static,
    P: FnMut(&T) -> Fut + Send,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    async fn route(&mut self, element: T) -> Result<(T, Route)> {
        if self.closed {
            // Past the boundary everything goes right, unclassified.
            return Ok((element, Route::Right));
        }
        let test = (self.predicate)(&element);
        if test.await? {
            Ok((element, Route::Left))
        } else {
            self.closed = true;
            Ok((element, Route::Right))
        }
    }

    fn left_closed(&self) -> bool {
        self.closed
    }
}

/// Split a source into its longest prefix satisfying a predicate (left) and
/// everything from the first failing element on (right).
pub fn span<S, P, Fut>(source: S, predicate: P) -> (FanSide<S::Item>, FanSide<S::Item>)
where
    S: Source + Send + 'static,
    P: FnMut(&S::Item) -> Fut + Send + 'static,
    Fut: Future<Output = Result<bool>> + Send + 'static,
{
    spawn_fanout(
        source,
        SpanRouter {
            predicate,
            closed: false,
            _future: PhantomData,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::iter;

    async fn drain<T: Send + 'static>(side: &mut FanSide<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(value) = side.pull().await.unwrap() {
            out.push(value);
        }
        out
    }

    #[tokio::test]
    async fn partition_routes_by_predicate() {
        let (mut evens, mut odds) = partition(iter(1..=6), |n: &i32| {
            let n = *n;
            async move { Ok(n % 2 == 0) }
        });
        assert_eq!(drain(&mut evens).await, vec![2, 4, 6]);
        assert_eq!(drain(&mut odds).await, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn partition_sides_are_independent() {
        let (mut evens, mut odds) = partition(iter(1..=6), |n: &i32| {
            let n = *n;
            async move { Ok(n % 2 == 0) }
        });
        // Draining one side first must not block, and the other side still
        // yields everything afterwards.
        assert_eq!(drain(&mut odds).await, vec![1, 3, 5]);
        assert_eq!(drain(&mut evens).await, vec![2, 4, 6]);
    }

    #[tokio::test]
    async fn partition_serves_interleaved_pulls() {
        let (mut evens, mut odds) = partition(iter(1..=4), |n: &i32| {
            let n = *n;
            async move { Ok(n % 2 == 0) }
        });
        let (even, odd) = tokio::join!(evens.pull(), odds.pull());
        assert_eq!(even.unwrap(), Some(2));
        assert_eq!(odd.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn split_at_closes_left_at_boundary() {
        let (mut head, mut tail) = split_at(iter(1..=5), 2);
        assert_eq!(drain(&mut head).await, vec![1, 2]);
        assert_eq!(head.pull().await.unwrap(), None);
        assert_eq!(drain(&mut tail).await, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn split_at_right_first_buffers_left() {
        let (mut head, mut tail) = split_at(iter(1..=5), 2);
        // Reading the tail first forces the prefix into the left queue.
        assert_eq!(drain(&mut tail).await, vec![3, 4, 5]);
        assert_eq!(drain(&mut head).await, vec![1, 2]);
    }

    #[tokio::test]
    async fn split_at_zero_left_is_empty() {
        let (mut head, mut tail) = split_at(iter(vec![7, 8]), 0);
        assert_eq!(head.pull().await.unwrap(), None);
        assert_eq!(drain(&mut tail).await, vec![7, 8]);
    }

    #[tokio::test]
    async fn span_splits_at_first_failure() {
        let (mut prefix, mut rest) = span(iter(vec![2, 4, 6, 5, 8]), |n: &i32| {
            let n = *n;
            async move { Ok(n % 2 == 0) }
        });
        assert_eq!(drain(&mut prefix).await, vec![2, 4, 6]);
        // 8 is even but lies past the boundary, so it stays on the right.
        assert_eq!(drain(&mut rest).await, vec![5, 8]);
    }

    #[tokio::test]
    async fn span_right_first_still_sees_boundary() {
        let (mut prefix, mut rest) = span(iter(vec![2, 4, 5, 6]), |n: &i32| {
            let n = *n;
            async move { Ok(n % 2 == 0) }
        });
        assert_eq!(rest.pull().await.unwrap(), Some(5));
        assert_eq!(rest.pull().await.unwrap(), Some(6));
        assert_eq!(rest.pull().await.unwrap(), None);
        assert_eq!(drain(&mut prefix).await, vec![2, 4]);
    }

    #[tokio::test]
    async fn terminal_pulls_stay_terminal_on_both_sides() {
        let (mut left, mut right) = partition(iter(Vec::<i32>::new()), |_: &i32| async {
            Ok(true)
        });
        for _ in 0..2 {
            assert_eq!(left.pull().await.unwrap(), None);
            assert_eq!(right.pull().await.unwrap(), None);
        }
    }
}
