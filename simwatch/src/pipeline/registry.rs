//! Reference-counted subscription registry
//!
//! Maps each server output name to the set of monitors that need it. A name
//! is subscribed on the wire iff its set is non-empty; callers act on the
//! empty/non-empty transitions reported here.

use super::monitor::MonitorId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscribed {
    /// First monitor for this name; the name must go on the wire.
    First,
    /// Another monitor already keeps the name alive.
    Shared,
    /// The monitor was already registered for this name.
    AlreadyPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsubscribed {
    /// Last monitor removed; the name must leave the wire.
    Last,
    /// Other monitors still reference the name.
    Remaining,
    /// The monitor was not registered for this name.
    NotPresent,
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<String, BTreeSet<MonitorId>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn subscribe(&mut self, id: &MonitorId, name: &str) -> Subscribed {
        let set = self.entries.entry(name.to_string()).or_default();
        let first = set.is_empty();
        if !set.insert(id.clone()) {
            Subscribed::AlreadyPresent
        } else if first {
            Subscribed::First
        } else {
            Subscribed::Shared
        }
    }

    pub fn unsubscribe(&mut self, id: &MonitorId, name: &str) -> Unsubscribed {
        let Some(set) = self.entries.get_mut(name) else {
            return Unsubscribed::NotPresent;
        };
        if !set.remove(id) {
            return Unsubscribed::NotPresent;
        }
        if set.is_empty() {
            self.entries.remove(name);
            Unsubscribed::Last
        } else {
            Unsubscribed::Remaining
        }
    }

    /// Subscribed names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn monitors_for(&self, name: &str) -> Vec<MonitorId> {
        self.entries
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every monitor present in any entry.
    pub fn all_monitors(&self) -> BTreeSet<MonitorId> {
        self.entries.values().flatten().cloned().collect()
    }

    pub fn refcount(&self, name: &str) -> usize {
        self.entries.get(name).map_or(0, BTreeSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry, returning the names that were subscribed.
    pub fn clear(&mut self) -> Vec<String> {
        std::mem::take(&mut self.entries).into_keys().collect()
    }
}
