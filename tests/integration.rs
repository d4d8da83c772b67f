//! Integration tests for the pull-based stream system

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::sleep;

use streamgate::prelude::*;
use streamgate::Error;

/// Wraps a source and counts how often it is pulled.
struct Counted<S> {
    inner: S,
    pulls: Arc<AtomicUsize>,
}

impl<S> Counted<S> {
    fn new(inner: S) -> (Self, Arc<AtomicUsize>) {
        let pulls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                pulls: Arc::clone(&pulls),
            },
            pulls,
        )
    }
}

#[async_trait]
impl<S: Source + Send> Source for Counted<S> {
    type Item = S::Item;

    async fn pull(&mut self) -> streamgate::Result<Option<Self::Item>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        self.inner.pull().await
    }
}

#[tokio::test]
async fn relay_preserves_submission_order_under_latency() {
    // Transforms for earlier elements take the longest, so completion order
    // is the reverse of submission order.
    let out = iter(0u64..8)
        .map_concurrent(8, |n| async move {
            sleep(Duration::from_millis((8 - n) * 5)).await;
            Ok(n)
        })
        .collect()
        .await
        .unwrap();
    assert_eq!(out, (0..8).collect::<Vec<_>>());
}

#[tokio::test]
async fn relay_bounds_outstanding_work() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&in_flight);
    let high_water = Arc::clone(&peak);

    let out = iter(0..40)
        .map_concurrent(4, move |n| {
            let counter = Arc::clone(&counter);
            let high_water = Arc::clone(&high_water);
            async move {
                let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(3)).await;
                counter.fetch_sub(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .collect()
        .await
        .unwrap();

    assert_eq!(out.len(), 40);
    assert!(peak.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn filter_is_correct_under_concurrent_classification() {
    let filter = iter(1i64..=6).filter(|n| {
        let n = *n;
        async move {
            sleep(Duration::from_millis((n * 13 % 7) as u64 * 4)).await;
            Ok(n % 2 == 0)
        }
    });

    // All requests are in flight before the first one resolves.
    let requests: Vec<_> = (0..8).map(|_| filter.request()).collect();
    let mut seen = Vec::new();
    for request in requests {
        if let Some(value) = request.await.unwrap() {
            seen.push(value);
        }
    }
    assert_eq!(seen, vec![2, 4, 6]);
}

#[tokio::test]
async fn take_while_cuts_off_without_extra_pulls() {
    let (source, pulls) = Counted::new(iter(vec![2, 4, 6, 5, 8]));
    let mut stage = source.take_while(|n| {
        let n = *n;
        async move { Ok(n % 2 == 0) }
    });

    let mut seen = Vec::new();
    while let Some(value) = stage.pull().await.unwrap() {
        seen.push(value);
    }
    assert_eq!(seen, vec![2, 4, 6]);

    // One pull per decided element; the value after the cutoff was never
    // fetched, and pulling past the end does not resume production.
    let after_cutoff = pulls.load(Ordering::SeqCst);
    assert_eq!(after_cutoff, 4);
    assert_eq!(stage.pull().await.unwrap(), None);
    assert_eq!(pulls.load(Ordering::SeqCst), after_cutoff);
}

#[tokio::test]
async fn drop_while_skips_prefix_only() {
    let out = iter(vec![1, 3, 5, 4, 7])
        .drop_while(|n| {
            let n = *n;
            async move { Ok(n % 2 == 1) }
        })
        .collect()
        .await
        .unwrap();
    assert_eq!(out, vec![4, 7]);
}

#[tokio::test]
async fn unique_preserves_first_occurrence_order() {
    let unique = iter(vec![1, 2, 1, 3, 2, 4]).unique();
    let requests: Vec<_> = (0..7).map(|_| unique.request()).collect();
    let mut seen = Vec::new();
    for request in requests {
        if let Some(value) = request.await.unwrap() {
            seen.push(value);
        }
    }
    assert_eq!(seen, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn fan_out_sides_drain_independently() {
    let (mut evens, mut odds) = iter(1..=6).partition(|n| {
        let n = *n;
        async move { Ok(n % 2 == 0) }
    });

    let mut right = Vec::new();
    while let Some(value) = odds.pull().await.unwrap() {
        right.push(value);
    }
    assert_eq!(right, vec![1, 3, 5]);

    let mut left = Vec::new();
    while let Some(value) = evens.pull().await.unwrap() {
        left.push(value);
    }
    assert_eq!(left, vec![2, 4, 6]);
}

#[tokio::test]
async fn terminal_pulls_stay_terminal_everywhere() {
    let mut buffered = iter(vec![1]).buffered(2);
    let mut concurrent = iter(vec![1]).map_concurrent(2, |n: i32| async move { Ok(n) });
    let mut filtered = iter(vec![1]).filter(|_: &i32| async { Ok(true) });
    let mut prefix = iter(vec![1, 2]).take_while(|n| {
        let n = *n;
        async move { Ok(n < 2) }
    });
    let mut suffix = iter(vec![1]).drop_while(|_: &i32| async { Ok(false) });
    let mut deduped = iter(vec![1, 1]).unique();
    let mut taken = iter(vec![1]).take(1);

    while buffered.pull().await.unwrap().is_some() {}
    while concurrent.pull().await.unwrap().is_some() {}
    while filtered.pull().await.unwrap().is_some() {}
    while prefix.pull().await.unwrap().is_some() {}
    while suffix.pull().await.unwrap().is_some() {}
    while deduped.pull().await.unwrap().is_some() {}
    while taken.pull().await.unwrap().is_some() {}

    for _ in 0..3 {
        assert_eq!(buffered.pull().await.unwrap(), None);
        assert_eq!(concurrent.pull().await.unwrap(), None);
        assert_eq!(filtered.pull().await.unwrap(), None);
        assert_eq!(prefix.pull().await.unwrap(), None);
        assert_eq!(suffix.pull().await.unwrap(), None);
        assert_eq!(deduped.pull().await.unwrap(), None);
        assert_eq!(taken.pull().await.unwrap(), None);
    }
}

#[tokio::test]
async fn upstream_error_surfaces_on_one_pull_only() {
    let mut calls = 0;
    let source = from_fn(move || {
        calls += 1;
        let step = calls;
        async move {
            match step {
                1 => Ok(Some(1)),
                2 => Err(Error::custom("flaky fetch")),
                3 => Ok(Some(3)),
                _ => Ok(None),
            }
        }
    });

    let mut buffered = Buffered::new(source, 2);
    assert_eq!(buffered.pull().await.unwrap(), Some(1));
    assert!(buffered.pull().await.is_err());
    assert_eq!(buffered.pull().await.unwrap(), Some(3));
    assert_eq!(buffered.pull().await.unwrap(), None);
}

#[tokio::test]
async fn stages_compose_into_pipelines() {
    let out = iter(1..=100)
        .buffered(8)
        .filter(|n| {
            let n = *n;
            async move { Ok(n % 2 == 0) }
        })
        .map(|n, _| n * 2)
        .take(5)
        .collect()
        .await
        .unwrap();
    assert_eq!(out, vec![4, 8, 12, 16, 20]);
}

#[tokio::test]
async fn fan_out_composes_with_downstream_stages() {
    let (prefix, rest) = iter(vec![2, 4, 6, 5, 8]).span(|n| {
        let n = *n;
        async move { Ok(n % 2 == 0) }
    });

    let doubled = prefix.map(|n, _| n * 2).collect().await.unwrap();
    assert_eq!(doubled, vec![4, 8, 12]);
    assert_eq!(rest.collect().await.unwrap(), vec![5, 8]);
}

#[tokio::test]
async fn stream_adapter_yields_all_elements() {
    let mut stream = iter(1..=4).map(|n, _| n * n).into_stream();
    let mut seen = Vec::new();
    while let Some(result) = stream.next().await {
        seen.push(result.unwrap());
    }
    assert_eq!(seen, vec![1, 4, 9, 16]);
}

#[tokio::test]
async fn boxed_sources_chain_heterogeneously() {
    let first: BoxSource<i32> = iter(1..=2).boxed();
    let second: BoxSource<i32> = iter(vec![10, 20]).map(|n, _| n / 10).boxed();
    let out = first.chain(second).collect().await.unwrap();
    assert_eq!(out, vec![1, 2, 1, 2]);
}

#[tokio::test]
async fn terminal_aggregations() {
    assert_eq!(iter(1..=5).count().await.unwrap(), 5);
    assert_eq!(
        iter(1..=4).fold(0, |acc, n| acc + n).await.unwrap(),
        10
    );
    assert!(iter(vec![2, 4, 6]).all(|n| n % 2 == 0).await.unwrap());
    assert!(iter(vec![1, 2, 3]).any(|n| *n == 2).await.unwrap());
    assert_eq!(
        iter(1..=10).find(|n| n % 7 == 0).await.unwrap(),
        Some(7)
    );
    assert_eq!(iter(vec!["x", "y"]).first().await.unwrap(), Some("x"));
    assert_eq!(iter(Vec::<i32>::new()).first().await.unwrap(), None);
}
