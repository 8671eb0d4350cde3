//! Crawl frontier — the priority structure of pending discovery work.
//!
//! Dequeue returns items highest-priority first, ties broken by insertion
//! order, and removes the item so a given item is owned by exactly one worker
//! for its lifetime. Re-enqueueing on retryable failure is the caller's job.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use tidepool_common::FrontierItem;

/// Priority drop applied when a transiently-failed item is requeued.
const REQUEUE_PRIORITY_PENALTY: i32 = 2;

struct QueuedItem {
    priority: i32,
    seq: u64,
    item: FrontierItem,
}

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedItem {}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on priority; among equals, earlier insertion wins.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct FrontierInner {
    heap: BinaryHeap<QueuedItem>,
    next_seq: u64,
    total_dequeues: u64,
}

/// Shared pending-work queue. All mutation happens under one lock; critical
/// sections never await, so std::sync::Mutex is sufficient.
pub struct Frontier {
    inner: Mutex<FrontierInner>,
}

impl Default for Frontier {
    fn default() -> Self {
        Self::new()
    }
}

impl Frontier {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FrontierInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                total_dequeues: 0,
            }),
        }
    }

    pub fn enqueue(&self, item: FrontierItem) {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueuedItem {
            priority: item.priority,
            seq,
            item,
        });
    }

    /// Remove and return the highest-priority item, or `None` when empty.
    /// The returned item's `attempt` counter is already incremented.
    pub fn dequeue(&self) -> Option<FrontierItem> {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        let queued = inner.heap.pop()?;
        inner.total_dequeues += 1;
        let mut item = queued.item;
        item.attempt += 1;
        Some(item)
    }

    /// Put a transiently-failed item back with reduced priority.
    pub fn requeue(&self, mut item: FrontierItem) {
        item.priority -= REQUEUE_PRIORITY_PENALTY;
        self.enqueue(item);
    }

    /// Lifetime dequeue count — feeds the expander's global-volume unlock.
    pub fn total_dequeues(&self) -> u64 {
        self.inner.lock().expect("frontier lock poisoned").total_dequeues
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("frontier lock poisoned").heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
