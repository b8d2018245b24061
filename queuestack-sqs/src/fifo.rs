//! FIFO message group sequencing and locking

use std::collections::{HashMap, HashSet};

/// Per-queue FIFO bookkeeping.
///
/// Sequence counters live as long as the queue and are never reset. A group
/// is locked while one of its messages is in flight; only one delivery per
/// group may be outstanding. Every update touches a single group's entry.
#[derive(Debug, Default, Clone)]
pub struct FifoGroupLock {
    locked: HashSet<String>,
    sequences: HashMap<String, u64>,
}

impl FifoGroupLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number for `group_id`, starting at "1"
    pub fn next_sequence_number(&mut self, group_id: &str) -> String {
        let counter = self.sequences.entry(group_id.to_string()).or_insert(0);
        *counter += 1;
        counter.to_string()
    }

    pub fn is_locked(&self, group_id: &str) -> bool {
        self.locked.contains(group_id)
    }

    pub fn lock_group(&mut self, group_id: &str) {
        if !self.locked.contains(group_id) {
            self.locked.insert(group_id.to_string());
        }
    }

    pub fn unlock_group(&mut self, group_id: &str) {
        self.locked.remove(group_id);
    }

    /// Release every lock, keeping sequence counters
    pub fn unlock_all(&mut self) {
        self.locked.clear();
    }

    pub fn locked_count(&self) -> usize {
        self.locked.len()
    }
}
