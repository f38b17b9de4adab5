//! Bounded ingestion queues
//!
//! Fixed-capacity FIFO that evicts its oldest item to admit a new one, so
//! the consumer always sees the freshest data. Pushes never block.

use super::monitor::{MonitorId, MonitorStatus};
use crate::data::Sample;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct DataItem {
    pub monitor: MonitorId,
    /// Shared between every monitor mapped to the same server output.
    pub sample: Arc<Sample>,
    pub received: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusItem {
    pub monitor: MonitorId,
    pub status: MonitorStatus,
}

/// Anything addressed to a single monitor.
pub trait Addressed {
    fn monitor(&self) -> &MonitorId;
}

impl Addressed for DataItem {
    fn monitor(&self) -> &MonitorId {
        &self.monitor
    }
}

impl Addressed for StatusItem {
    fn monitor(&self) -> &MonitorId {
        &self.monitor
    }
}

#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> BoundedQueue<T> {
        BoundedQueue {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `item`, returning the evicted oldest item if the queue was
    /// full.
    pub fn push(&mut self, item: T) -> Option<T> {
        if self.capacity == 0 {
            return Some(item);
        }
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Pops up to `n` items, oldest first.
    pub fn pop_batch(&mut self, n: usize) -> Vec<T> {
        let n = n.min(self.items.len());
        self.items.drain(..n).collect()
    }

    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Keeps only the items matching `keep`. Returns how many were removed.
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, keep: F) -> usize {
        let before = self.items.len();
        self.items.retain(keep);
        before - self.items.len()
    }
}

impl<T: Addressed> BoundedQueue<T> {
    /// Removes every item addressed to `id`.
    pub fn purge(&mut self, id: &MonitorId) -> usize {
        self.retain(|item| item.monitor() != id)
    }

    pub fn references(&self, id: &MonitorId) -> bool {
        self.items.iter().any(|item| item.monitor() == id)
    }

    /// Keeps only the newest item per monitor, preserving queue order.
    /// Returns how many items were removed.
    pub fn compact_latest(&mut self) -> usize {
        let mut seen = BTreeSet::new();
        let mut keep = vec![false; self.items.len()];
        for (i, item) in self.items.iter().enumerate().rev() {
            if seen.insert(item.monitor().clone()) {
                keep[i] = true;
            }
        }
        let mut keep = keep.into_iter();
        self.retain(|_| keep.next().unwrap_or(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(monitor: &str, value: f32) -> DataItem {
        DataItem {
            monitor: MonitorId::new(monitor, "out", 0),
            sample: Arc::new(Sample::scalar(value)),
            received: Instant::now(),
        }
    }

    #[test]
    fn evicts_oldest_on_overflow() {
        let mut q = BoundedQueue::new(100);
        for i in 0..150 {
            let evicted = q.push(i);
            if i < 100 {
                assert!(evicted.is_none());
            } else {
                assert_eq!(evicted, Some(i - 100));
            }
            assert!(q.len() <= 100);
        }
        assert_eq!(q.pop(), Some(50));
        assert_eq!(q.len(), 99);
    }

    #[test]
    fn pop_batch_limits() {
        let mut q = BoundedQueue::new(10);
        for i in 0..7 {
            q.push(i);
        }
        assert_eq!(q.pop_batch(5), vec![0, 1, 2, 3, 4]);
        assert_eq!(q.pop_batch(5), vec![5, 6]);
        assert!(q.pop_batch(5).is_empty());
    }

    #[test]
    fn purge_removes_only_target() {
        let mut q = BoundedQueue::new(10);
        q.push(item("a", 1.0));
        q.push(item("b", 2.0));
        q.push(item("a", 3.0));
        let a = MonitorId::new("a", "out", 0);
        assert_eq!(q.purge(&a), 2);
        assert!(!q.references(&a));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn compact_keeps_newest_per_monitor() {
        let mut q = BoundedQueue::new(10);
        q.push(item("a", 1.0));
        q.push(item("b", 2.0));
        q.push(item("a", 3.0));
        q.push(item("b", 4.0));
        q.push(item("c", 5.0));
        assert_eq!(q.compact_latest(), 2);
        let values: Vec<f32> = q.iter().map(|i| i.sample.values[0]).collect();
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
    }
}
