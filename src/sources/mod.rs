//! Source implementations for the streamgate library.
//!
//! These produce the elements that stages downstream transform, classify,
//! buffer and fan out.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::core::{Result, Source};

/// A source yielding the elements of any iterable collection.
pub struct IterSource<I> {
    items: I,
}

/// Create a source from anything iterable.
///
/// # Examples
///
/// ```rust
/// use streamgate::prelude::*;
///
/// # tokio_test::block_on(async {
/// let values = iter(1..=3).collect().await.unwrap();
/// assert_eq!(values, vec![1, 2, 3]);
/// # });
/// ```
pub fn iter<I: IntoIterator>(items: I) -> IterSource<I::IntoIter> {
    IterSource {
        items: items.into_iter(),
    }
}

#[async_trait]
impl<I> Source for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Send + 'static,
{
    type Item = I::Item;

    async fn pull(&mut self) -> Result<Option<Self::Item>> {
        Ok(self.items.next())
    }
}

/// A source created from a function producing one element per call.
pub struct FnSource<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    f: F,
    _phantom: PhantomData<(Fut, T)>,
}

/// Create a source from a function.
///
/// The function is called once per pull; returning `Ok(None)` ends the
/// stream.
pub fn from_fn<F, Fut, T>(f: F) -> FnSource<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    FnSource {
        f,
        _phantom: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> Source for FnSource<F, Fut, T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Option<T>>> + Send,
    T: Send + 'static,
{
    type Item = T;

    async fn pull(&mut self) -> Result<Option<Self::Item>> {
        (self.f)().await
    }
}
