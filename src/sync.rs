//! One-shot gates and FIFO queues used by the coordination stages.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A one-shot synchronization gate.
///
/// Created unresolved, resolved at most once; resolving again is a no-op.
/// Any number of waiters may wait before or after resolution, and all of
/// them observe it.
#[derive(Clone, Default)]
pub struct Signal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    resolved: AtomicBool,
    notify: Notify,
}

impl Signal {
    /// Create a new, unresolved signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal resolved and wake every current waiter.
    pub fn resolve(&self) {
        if !self.inner.resolved.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the signal has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.load(Ordering::Acquire)
    }

    /// Wait until the signal is resolved. Returns immediately if it already
    /// is.
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register interest before checking the flag so a concurrent resolve
        // cannot slip between the check and the await.
        notified.as_mut().enable();
        if self.is_resolved() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// An O(1) first-in, first-out queue.
///
/// Dequeuing an empty queue is a caller error and panics; callers gate every
/// dequeue on [`Fifo::is_empty`] or a separately tracked count.
#[derive(Debug)]
pub struct Fifo<T> {
    items: VecDeque<T>,
}

impl<T> Fifo<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }

    /// Append an item at the back.
    pub fn enqueue(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the front item.
    ///
    /// # Panics
    ///
    /// Panics if the queue is empty.
    pub fn dequeue(&mut self) -> T {
        self.items.pop_front().expect("dequeue on empty queue")
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// The front item without removing it.
    pub fn peek_front(&self) -> Option<&T> {
        self.items.front()
    }

    /// Mutable access to the front item without removing it.
    pub fn peek_front_mut(&mut self) -> Option<&mut T> {
        self.items.front_mut()
    }
}

impl<T> Default for Fifo<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn signal_wait_after_resolve() {
        let signal = Signal::new();
        signal.resolve();
        signal.wait().await;
        assert!(signal.is_resolved());
    }

    #[tokio::test]
    async fn signal_wakes_multiple_waiters() {
        let signal = Signal::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                tokio::spawn(async move { signal.wait().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.resolve();
        // Resolving twice is a no-op.
        signal.resolve();

        for waiter in waiters {
            waiter.await.unwrap();
        }
    }

    #[test]
    fn fifo_preserves_order() {
        let mut fifo = Fifo::new();
        fifo.enqueue(1);
        fifo.enqueue(2);
        fifo.enqueue(3);
        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.peek_front(), Some(&1));
        assert_eq!(fifo.dequeue(), 1);
        assert_eq!(fifo.dequeue(), 2);
        assert_eq!(fifo.dequeue(), 3);
        assert!(fifo.is_empty());
    }

    #[test]
    #[should_panic(expected = "dequeue on empty queue")]
    fn fifo_dequeue_empty_panics() {
        let mut fifo: Fifo<i32> = Fifo::new();
        fifo.dequeue();
    }
}
