//! Named services and their idle-worker queues.

use std::collections::{BTreeMap, HashMap, HashSet};

use super::worker::WorkerKey;

/// FIFO of idle workers with keyed removal.
///
/// Entries are ordered by an insertion sequence number; an index from key to
/// sequence number makes `remove` O(log n) instead of a scan. A key is queued
/// at most once.
#[derive(Debug, Default)]
pub struct IdleQueue {
    order: BTreeMap<u64, WorkerKey>,
    index: HashMap<WorkerKey, u64>,
    next_seq: u64,
}

impl IdleQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `key` at the tail. Returns `false` if it was already queued,
    /// in which case its position is unchanged.
    pub fn push_back(&mut self, key: WorkerKey) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(key.clone(), seq);
        self.order.insert(seq, key);
        true
    }

    /// Removes and returns the oldest entry.
    pub fn pop_front(&mut self) -> Option<WorkerKey> {
        let (_, key) = self.order.pop_first()?;
        self.index.remove(&key);
        Some(key)
    }

    #[must_use]
    pub fn front(&self) -> Option<&WorkerKey> {
        self.order.values().next()
    }

    /// Removes `key` wherever it sits. Returns whether it was queued.
    pub fn remove(&mut self, key: &WorkerKey) -> bool {
        match self.index.remove(key) {
            Some(seq) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn contains(&self, key: &WorkerKey) -> bool {
        self.index.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &WorkerKey> {
        self.order.values()
    }
}

/// A named service: every worker bound to it, and those currently idle.
///
/// Every idle worker is also a member.
#[derive(Debug)]
pub struct Service {
    name: String,
    members: HashSet<WorkerKey>,
    idle: IdleQueue,
}

impl Service {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashSet::new(),
            idle: IdleQueue::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Marks a worker idle: adds it to the members and to the tail of the
    /// idle queue unless already queued.
    pub fn add_waiting_worker(&mut self, key: WorkerKey) {
        self.members.insert(key.clone());
        self.idle.push_back(key);
    }

    /// Pops the oldest idle worker. It stays a member.
    pub fn next_worker(&mut self) -> Option<WorkerKey> {
        self.idle.pop_front()
    }

    /// Drops a worker from both the members and the idle queue.
    pub fn delete_worker(&mut self, key: &WorkerKey) {
        self.idle.remove(key);
        self.members.remove(key);
    }

    #[must_use]
    pub fn is_member(&self, key: &WorkerKey) -> bool {
        self.members.contains(key)
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn idle(&self) -> &IdleQueue {
        &self.idle
    }
}
