//! Pending message queue.

use std::collections::VecDeque;

/// A message waiting to be cut into a batch, paired with its derived key.
#[derive(Debug, Clone)]
pub struct PendingEntry<T> {
    pub key: String,
    pub message: T,
}

/// Ordered sequence of messages not yet assigned to any batch.
///
/// No locking of its own; the engine serializes access through its state mutex.
#[derive(Debug)]
pub struct PendingQueue<T> {
    entries: VecDeque<PendingEntry<T>>,
}

impl<T> PendingQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    pub fn append(&mut self, key: String, message: T) {
        self.entries.push_back(PendingEntry { key, message });
    }

    /// Remove and return up to `max` entries from the front, preserving order.
    /// The remainder stays queued for a future flush.
    pub fn drain(&mut self, max: usize) -> Vec<PendingEntry<T>> {
        let count = max.min(self.entries.len());
        self.entries.drain(..count).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for PendingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
