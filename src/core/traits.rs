//! The pull contract shared by every stage in the system.
//!
//! A consumer repeatedly pulls the outermost stage; each stage pulls the one
//! beneath it, applying its own coordination policy, down to the original
//! producer. Elements flow downstream, pull requests flow upstream.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::oneshot;

use crate::core::error::{Error, Result};

/// A pull-based producer of elements.
///
/// `Ok(Some(value))` carries the next element; `Ok(None)` is the terminal
/// marker. Every stage in this crate keeps answering `Ok(None)` once it has
/// produced it — pulling past the end neither errors nor resumes production.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use streamgate::core::{Result, Source};
///
/// struct Counter {
///     current: u64,
///     max: u64,
/// }
///
/// #[async_trait]
/// impl Source for Counter {
///     type Item = u64;
///
///     async fn pull(&mut self) -> Result<Option<Self::Item>> {
///         if self.current < self.max {
///             self.current += 1;
///             Ok(Some(self.current))
///         } else {
///             Ok(None)
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Source {
    /// The type of elements this source produces
    type Item: Send + 'static;

    /// Pull the next element, or `None` once the source is exhausted.
    async fn pull(&mut self) -> Result<Option<Self::Item>>;
}

/// A boxed source, for heterogeneous chains and storage in collections.
pub type BoxSource<T> = Box<dyn Source<Item = T> + Send>;

#[async_trait]
impl<S: Source + Send + ?Sized> Source for Box<S> {
    type Item = S::Item;

    async fn pull(&mut self) -> Result<Option<Self::Item>> {
        (**self).pull().await
    }
}

/// An in-flight pull issued through a stage's `request` method.
///
/// Stages that coordinate through a background task accept several requests
/// before the first one resolves; the futures resolve strictly in the order
/// the requests were issued.
pub struct PendingPull<T> {
    receiver: Option<oneshot::Receiver<Result<Option<T>>>>,
}

impl<T> PendingPull<T> {
    pub(crate) fn new(receiver: oneshot::Receiver<Result<Option<T>>>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    /// A request against a stage whose coordinator is already gone.
    pub(crate) fn closed() -> Self {
        Self { receiver: None }
    }
}

impl<T> Future for PendingPull<T> {
    type Output = Result<Option<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.receiver.as_mut() {
            None => Poll::Ready(Err(Error::ChannelClosed)),
            Some(receiver) => match Pin::new(receiver).poll(cx) {
                Poll::Ready(reply) => {
                    self.receiver = None;
                    Poll::Ready(reply.unwrap_or(Err(Error::ChannelClosed)))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Extension trait chaining stages onto any [`Source`] and draining them.
#[async_trait]
pub trait SourceExt: Source {
    /// Transform every element with a function receiving the element index.
    fn map<F, U>(self, transform: F) -> crate::stages::Map<Self, F>
    where
        Self: Sized,
        F: FnMut(Self::Item, u64) -> U + Send,
        U: Send + 'static,
    {
        crate::stages::Map::new(self, transform)
    }

    /// Expand every element into a nested source and flatten the results.
    fn flat_map<F, S2>(self, transform: F) -> crate::stages::FlatMap<Self, F, S2>
    where
        Self: Sized,
        F: FnMut(Self::Item, u64) -> S2 + Send,
        S2: Source + Send,
    {
        crate::stages::FlatMap::new(self, transform)
    }

    /// Observe every element without consuming it.
    fn inspect<F>(self, callback: F) -> crate::stages::Inspect<Self, F>
    where
        Self: Sized,
        F: FnMut(&Self::Item) + Send,
    {
        crate::stages::Inspect::new(self, callback)
    }

    /// Limit the stream to the first `count` elements.
    fn take(self, count: usize) -> crate::stages::Take<Self>
    where
        Self: Sized,
    {
        crate::stages::Take::new(self, count)
    }

    /// Discard the first `count` elements.
    fn drop(self, count: usize) -> crate::stages::Drop<Self>
    where
        Self: Sized,
    {
        crate::stages::Drop::new(self, count)
    }

    /// Group elements into fixed-size chunks; a partial final chunk is kept.
    fn batch(self, size: usize) -> crate::stages::Batch<Self>
    where
        Self: Sized,
    {
        crate::stages::Batch::new(self, size)
    }

    /// Yield this source's elements, then another source's.
    fn chain<S2>(self, other: S2) -> crate::stages::Chain<Self, S2>
    where
        Self: Sized,
        S2: Source<Item = Self::Item> + Send,
    {
        crate::stages::Chain::new(self, other)
    }

    /// Pair elements with another source's; ends with the shorter side.
    fn zip<S2>(self, other: S2) -> crate::stages::Zip<Self, S2>
    where
        Self: Sized,
        S2: Source + Send,
    {
        crate::stages::Zip::new(self, other)
    }

    /// Run upstream production up to `capacity` elements ahead of the
    /// consumer.
    fn buffered(self, capacity: usize) -> crate::stages::Buffered<Self::Item>
    where
        Self: Sized + Send + 'static,
    {
        crate::stages::Buffered::new(self, capacity)
    }

    /// Apply an asynchronous transform with up to `capacity` elements in
    /// flight at once, delivering results in upstream order.
    fn map_concurrent<F, Fut, U>(
        self,
        capacity: usize,
        transform: F,
    ) -> crate::stages::MapConcurrent<U>
    where
        Self: Sized + Send + 'static,
        F: FnMut(Self::Item) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
        U: Send + 'static,
    {
        crate::stages::MapConcurrent::new(self, capacity, transform)
    }

    /// Keep only elements satisfying an asynchronous predicate.
    fn filter<P, Fut>(self, predicate: P) -> crate::stages::Filter<Self::Item>
    where
        Self: Sized + Send + 'static,
        P: FnMut(&Self::Item) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        crate::stages::Filter::new(self, predicate)
    }

    /// Yield the longest prefix of elements satisfying a predicate.
    fn take_while<P, Fut>(self, predicate: P) -> crate::stages::TakeWhile<Self::Item>
    where
        Self: Sized + Send + 'static,
        P: FnMut(&Self::Item) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        crate::stages::TakeWhile::new(self, predicate)
    }

    /// Discard the longest prefix of elements satisfying a predicate and
    /// yield everything after it.
    fn drop_while<P, Fut>(self, predicate: P) -> crate::stages::DropWhile<Self::Item>
    where
        Self: Sized + Send + 'static,
        P: FnMut(&Self::Item) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        crate::stages::DropWhile::new(self, predicate)
    }

    /// Keep only the first occurrence of each element.
    fn unique(self) -> crate::stages::Unique<Self::Item>
    where
        Self: Sized + Send + 'static,
        Self::Item: std::hash::Hash + Eq + Clone,
    {
        crate::stages::Unique::new(self)
    }

    /// Split into elements satisfying a predicate (left) and the rest
    /// (right), each independently drainable.
    fn partition<P, Fut>(
        self,
        predicate: P,
    ) -> (
        crate::stages::FanSide<Self::Item>,
        crate::stages::FanSide<Self::Item>,
    )
    where
        Self: Sized + Send + 'static,
        P: FnMut(&Self::Item) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        crate::stages::partition(self, predicate)
    }

    /// Split into the first `index` elements (left) and the remainder
    /// (right).
    fn split_at(
        self,
        index: usize,
    ) -> (
        crate::stages::FanSide<Self::Item>,
        crate::stages::FanSide<Self::Item>,
    )
    where
        Self: Sized + Send + 'static,
    {
        crate::stages::split_at(self, index)
    }

    /// Split into the longest satisfying prefix (left) and the remainder
    /// (right).
    fn span<P, Fut>(
        self,
        predicate: P,
    ) -> (
        crate::stages::FanSide<Self::Item>,
        crate::stages::FanSide<Self::Item>,
    )
    where
        Self: Sized + Send + 'static,
        P: FnMut(&Self::Item) -> Fut + Send + 'static,
        Fut: Future<Output = Result<bool>> + Send + 'static,
    {
        crate::stages::span(self, predicate)
    }

    /// Erase the concrete source type.
    fn boxed(self) -> BoxSource<Self::Item>
    where
        Self: Sized + Send + 'static,
    {
        Box::new(self)
    }

    /// Adapt this source into a [`futures::Stream`] of results.
    fn into_stream(self) -> BoxStream<'static, Result<Self::Item>>
    where
        Self: Sized + Send + 'static,
    {
        Box::pin(futures::stream::unfold(self, |mut source| async move {
            match source.pull().await {
                Ok(Some(value)) => Some((Ok(value), source)),
                Ok(None) => None,
                Err(e) => Some((Err(e), source)),
            }
        }))
    }

    /// Drain the source into a vector.
    async fn collect(mut self) -> Result<Vec<Self::Item>>
    where
        Self: Sized + Send,
    {
        let mut items = Vec::new();
        while let Some(item) = self.pull().await? {
            items.push(item);
        }
        Ok(items)
    }

    /// Count the elements, consuming the source.
    async fn count(mut self) -> Result<usize>
    where
        Self: Sized + Send,
    {
        let mut count = 0;
        while self.pull().await?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Reduce the elements into an accumulator.
    async fn fold<A, F>(mut self, initial: A, mut combine: F) -> Result<A>
    where
        Self: Sized + Send,
        A: Send,
        F: FnMut(A, Self::Item) -> A + Send,
    {
        let mut acc = initial;
        while let Some(item) = self.pull().await? {
            acc = combine(acc, item);
        }
        Ok(acc)
    }

    /// `true` if every element satisfies the predicate; stops pulling at the
    /// first failure.
    async fn all<P>(mut self, mut predicate: P) -> Result<bool>
    where
        Self: Sized + Send,
        P: FnMut(&Self::Item) -> bool + Send,
    {
        while let Some(item) = self.pull().await? {
            if !predicate(&item) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `true` if any element satisfies the predicate; stops pulling at the
    /// first hit.
    async fn any<P>(mut self, mut predicate: P) -> Result<bool>
    where
        Self: Sized + Send,
        P: FnMut(&Self::Item) -> bool + Send,
    {
        while let Some(item) = self.pull().await? {
            if predicate(&item) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The first element satisfying the predicate, if any.
    async fn find<P>(mut self, mut predicate: P) -> Result<Option<Self::Item>>
    where
        Self: Sized + Send,
        P: FnMut(&Self::Item) -> bool + Send,
    {
        while let Some(item) = self.pull().await? {
            if predicate(&item) {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// The first element of the source, if any.
    async fn first(mut self) -> Result<Option<Self::Item>>
    where
        Self: Sized + Send,
    {
        self.pull().await
    }
}

impl<S: Source> SourceExt for S {}
