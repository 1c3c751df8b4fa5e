//! Lock-free FIFO queue for the decode pipeline

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;
use crossbeam::utils::CachePadded;

/// Unbounded FIFO queue shared between one producer and one consumer thread.
///
/// `pop` never blocks; an empty queue yields `None` and the caller re-polls
/// on its own schedule. Capacity limits are enforced by the callers (the
/// input valve checks `len` before pushing).
pub struct SyncQueue<T> {
    inner: SegQueue<T>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    pushed: AtomicUsize,
    popped: AtomicUsize,
}

impl<T> SyncQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: SegQueue::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn push(&self, item: T) {
        self.inner.push(item);
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pop(&self) -> Option<T> {
        let item = self.inner.pop();
        if item.is_some() {
            self.stats.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Totals since construction: `(pushed, popped)`.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.stats.pushed.load(Ordering::Relaxed),
            self.stats.popped.load(Ordering::Relaxed),
        )
    }
}

impl<T> Default for SyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
