//! State touched from both the delivery and the render context. Lives
//! behind the pipeline's single lock.

use super::monitor::{MonitorId, MonitorStatus};
use super::queue::{BoundedQueue, DataItem, StatusItem};
use super::registry::Registry;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

/// Pipeline counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Inbound events that failed validation.
    pub malformed: u64,
    /// Data events for names no monitor wants.
    pub unrouted: u64,
    pub data_evicted: u64,
    pub status_evicted: u64,
    /// Items dropped because their monitor was closed after enqueue.
    pub stale: u64,
    /// Items dropped by queue health compaction.
    pub compacted: u64,
    pub renders: u64,
    /// Samples parked in a monitor's pending slot instead of rendered.
    pub skipped: u64,
    pub frame_requests: u64,
    pub emit_failures: u64,
    /// Payload of the last `speed_report` event.
    pub speed_report: Option<Value>,
}

#[derive(Debug)]
pub(crate) struct Shared {
    pub data: BoundedQueue<DataItem>,
    pub status: BoundedQueue<StatusItem>,
    pub registry: Registry,
    pub stats: Stats,
}

pub(crate) type SharedRef = Arc<Mutex<Shared>>;

impl Shared {
    pub fn new(data_capacity: usize, status_capacity: usize) -> SharedRef {
        Arc::new(Mutex::new(Shared {
            data: BoundedQueue::new(data_capacity),
            status: BoundedQueue::new(status_capacity),
            registry: Registry::new(),
            stats: Stats::default(),
        }))
    }

    pub fn push_data(&mut self, item: DataItem) {
        if self.data.push(item).is_some() {
            self.stats.data_evicted += 1;
        }
    }

    pub fn push_status(&mut self, monitor: MonitorId, status: MonitorStatus) {
        if self.status.push(StatusItem { monitor, status }).is_some() {
            self.stats.status_evicted += 1;
        }
    }

    /// Queues `status` for every registered monitor.
    pub fn broadcast_status(&mut self, status: MonitorStatus) {
        for id in self.registry.all_monitors() {
            self.push_status(id, status.clone());
        }
    }
}

/// Locks the shared state. A panic on the other context must not wedge the
/// pipeline, so poisoning is ignored.
pub(crate) fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
