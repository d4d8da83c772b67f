//! Transform stages with no ordering subtlety.
//!
//! These stages pull one element at a time from their upstream and reshape
//! it on the way through; none of them keeps work in flight across pulls.

use async_trait::async_trait;

use crate::core::{Result, Source};

/// Applies a function to every element, passing the element index along.
pub struct Map<S, F> {
    source: S,
    transform: F,
    index: u64,
}

impl<S, F> Map<S, F> {
    pub fn new(source: S, transform: F) -> Self {
        Self {
            source,
            transform,
            index: 0,
        }
    }
}

#[async_trait]
impl<S, F, U> Source for Map<S, F>
where
    S: Source + Send,
    F: FnMut(S::Item, u64) -> U + Send,
    U: Send + 'static,
{
    type Item = U;

    async fn pull(&mut self) -> Result<Option<U>> {
        match self.source.pull().await? {
            Some(item) => {
                let index = self.index;
                self.index += 1;
                Ok(Some((self.transform)(item, index)))
            }
            None => Ok(None),
        }
    }
}

/// Expands every element into a nested source and yields the nested
/// elements in order.
pub struct FlatMap<S, F, S2> {
    source: S,
    transform: F,
    current: Option<S2>,
    index: u64,
    done: bool,
}

impl<S, F, S2> FlatMap<S, F, S2> {
    pub fn new(source: S, transform: F) -> Self {
        Self {
            source,
            transform,
            current: None,
            index: 0,
            done: false,
        }
    }
}

#[async_trait]
impl<S, F, S2> Source for FlatMap<S, F, S2>
where
    S: Source + Send,
    F: FnMut(S::Item, u64) -> S2 + Send,
    S2: Source + Send,
{
    type Item = S2::Item;

    async fn pull(&mut self) -> Result<Option<S2::Item>> {
        if self.done {
            return Ok(None);
        }
        loop {
            if let Some(inner) = &mut self.current {
                if let Some(item) = inner.pull().await? {
                    return Ok(Some(item));
                }
                self.current = None;
            }
            match self.source.pull().await? {
                Some(item) => {
                    let index = self.index;
                    self.index += 1;
                    self.current = Some((self.transform)(item, index));
                }
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
    }
}

/// Observes every element with a callback without consuming it.
pub struct Inspect<S, F> {
    source: S,
    callback: F,
}

impl<S, F> Inspect<S, F> {
    pub fn new(source: S, callback: F) -> Self {
        Self { source, callback }
    }
}

#[async_trait]
impl<S, F> Source for Inspect<S, F>
where
    S: Source + Send,
    F: FnMut(&S::Item) + Send,
{
    type Item = S::Item;

    async fn pull(&mut self) -> Result<Option<S::Item>> {
        match self.source.pull().await? {
            Some(item) => {
                (self.callback)(&item);
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

/// Yields at most the first `count` elements.
pub struct Take<S> {
    source: S,
    remaining: usize,
}

impl<S> Take<S> {
    pub fn new(source: S, count: usize) -> Self {
        Self {
            source,
            remaining: count,
        }
    }
}

#[async_trait]
impl<S: Source + Send> Source for Take<S> {
    type Item = S::Item;

    async fn pull(&mut self) -> Result<Option<S::Item>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        match self.source.pull().await? {
            Some(item) => {
                self.remaining -= 1;
                Ok(Some(item))
            }
            None => {
                self.remaining = 0;
                Ok(None)
            }
        }
    }
}

/// Discards the first `count` elements, then yields the rest.
pub struct Drop<S> {
    source: S,
    remaining: usize,
    done: bool,
}

impl<S> Drop<S> {
    pub fn new(source: S, count: usize) -> Self {
        Self {
            source,
            remaining: count,
            done: false,
        }
    }
}

#[async_trait]
impl<S: Source + Send> Source for Drop<S> {
    type Item = S::Item;

    async fn pull(&mut self) -> Result<Option<S::Item>> {
        if self.done {
            return Ok(None);
        }
        while self.remaining > 0 {
            match self.source.pull().await? {
                Some(_) => self.remaining -= 1,
                None => {
                    self.done = true;
                    return Ok(None);
                }
            }
        }
        match self.source.pull().await? {
            Some(item) => Ok(Some(item)),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// Groups elements into chunks of `size`; the final chunk may be shorter.
pub struct Batch<S: Source> {
    source: S,
    size: usize,
    buffer: Vec<S::Item>,
    done: bool,
}

impl<S: Source> Batch<S> {
    pub fn new(source: S, size: usize) -> Self {
        assert!(size >= 1, "batch size must be at least 1");
        Self {
            source,
            size,
            buffer: Vec::with_capacity(size),
            done: false,
        }
    }
}

#[async_trait]
impl<S: Source + Send> Source for Batch<S>
where
    S::Item: Send,
{
    type Item = Vec<S::Item>;

    async fn pull(&mut self) -> Result<Option<Vec<S::Item>>> {
        if self.done {
            return Ok(None);
        }
        while self.buffer.len() < self.size {
            match self.source.pull().await? {
                Some(item) => self.buffer.push(item),
                None => {
                    self.done = true;
                    break;
                }
            }
        }
        if self.buffer.is_empty() {
            Ok(None)
        } else {
            Ok(Some(std::mem::take(&mut self.buffer)))
        }
    }
}

/// Yields the first source's elements, then the second's.
pub struct Chain<S1, S2> {
    first: Option<S1>,
    second: S2,
}

impl<S1, S2> Chain<S1, S2> {
    pub fn new(first: S1, second: S2) -> Self {
        Self {
            first: Some(first),
            second,
        }
    }
}

#[async_trait]
impl<S1, S2> Source for Chain<S1, S2>
where
    S1: Source + Send,
    S2: Source<Item = S1::Item> + Send,
{
    type Item = S1::Item;

    async fn pull(&mut self) -> Result<Option<S1::Item>> {
        if let Some(first) = &mut self.first {
            match first.pull().await? {
                Some(item) => return Ok(Some(item)),
                None => self.first = None,
            }
        }
        self.second.pull().await
    }
}

/// Pairs elements from two sources; ends when either side does.
pub struct Zip<S1, S2> {
    left: S1,
    right: S2,
    done: bool,
}

impl<S1, S2> Zip<S1, S2> {
    pub fn new(left: S1, right: S2) -> Self {
        Self {
            left,
            right,
            done: false,
        }
    }
}

#[async_trait]
impl<S1, S2> Source for Zip<S1, S2>
where
    S1: Source + Send,
    S2: Source + Send,
{
    type Item = (S1::Item, S2::Item);

    async fn pull(&mut self) -> Result<Option<(S1::Item, S2::Item)>> {
        if self.done {
            return Ok(None);
        }
        let left = match self.left.pull().await? {
            Some(item) => item,
            None => {
                self.done = true;
                return Ok(None);
            }
        };
        match self.right.pull().await? {
            Some(right) => Ok(Some((left, right))),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourceExt;
    use crate::sources::iter;

    #[tokio::test]
    async fn map_passes_indices() {
        let pairs = iter(vec!["a", "b", "c"])
            .map(|s, i| (i, s))
            .collect()
            .await
            .unwrap();
        assert_eq!(pairs, vec![(0, "a"), (1, "b"), (2, "c")]);
    }

    #[tokio::test]
    async fn flat_map_flattens_in_order() {
        let out = iter(vec![1, 2, 3])
            .flat_map(|n, _| iter(vec![n, n * 10]))
            .collect()
            .await
            .unwrap();
        assert_eq!(out, vec![1, 10, 2, 20, 3, 30]);
    }

    #[tokio::test]
    async fn take_zero_never_pulls() {
        let mut pulled = 0;
        let out = iter(1..=5)
            .inspect(|_| pulled += 1)
            .take(0)
            .collect()
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(pulled, 0);
    }

    #[tokio::test]
    async fn take_limits_and_stays_terminal() {
        let mut taken = iter(1..=5).take(2);
        assert_eq!(taken.pull().await.unwrap(), Some(1));
        assert_eq!(taken.pull().await.unwrap(), Some(2));
        assert_eq!(taken.pull().await.unwrap(), None);
        assert_eq!(taken.pull().await.unwrap(), None);
    }

    #[tokio::test]
    async fn drop_discards_exactly_count() {
        let out = iter(1..=5).drop(2).collect().await.unwrap();
        assert_eq!(out, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn drop_past_end_is_empty() {
        let out = iter(1..=3).drop(7).collect().await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn batch_keeps_partial_tail() {
        let out = iter(1..=7).batch(3).collect().await.unwrap();
        assert_eq!(out, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[tokio::test]
    async fn chain_concatenates() {
        let out = iter(1..=3).chain(iter(4..=6)).collect().await.unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn zip_ends_with_shorter_side() {
        let out = iter(1..=4).zip(iter(vec!["a", "b"])).collect().await.unwrap();
        assert_eq!(out, vec![(1, "a"), (2, "b")]);
    }
}
