//! Bounded batch-status history.
//!
//! A fixed-capacity ring of completed batches plus two lookup indices
//! (message key → batch id, batch id → ring slot) giving O(1) status queries
//! and strict FIFO eviction. Lifespan is counted in batching cycles, not wall
//! time: a low-throughput engine holds a batch in cache far longer than a
//! high-throughput one. That bounds memory by `cache_lifespan × max_batch_size`
//! entries regardless of arrival rate.

use crate::queue::PendingEntry;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Unique identifier of a cut batch.
pub type BatchId = Uuid;

/// Lifecycle of a cut batch. `Batched` transitions exactly once, to
/// `Resolved` or `Rejected`, when its processing settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Batched,
    Resolved,
    Rejected,
}

/// Observable state of a message or batch, as reported by status lookups and
/// submit receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Submission was not accepted (absent message, duplicate, or engine stopped).
    Declined,
    /// Key or batch id is unknown, or its batch has been evicted.
    NotFound,
    /// Accepted and waiting in the pending queue.
    Queued,
    /// Cut into a batch whose processing has not settled yet.
    Batched,
    /// Batch processing completed successfully.
    Resolved,
    /// Batch processing failed; the batch is never reprocessed.
    Rejected,
}

impl From<BatchStatus> for MessageStatus {
    fn from(status: BatchStatus) -> Self {
        match status {
            BatchStatus::Batched => MessageStatus::Batched,
            BatchStatus::Resolved => MessageStatus::Resolved,
            BatchStatus::Rejected => MessageStatus::Rejected,
        }
    }
}

/// Result of a status lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub status: MessageStatus,
    pub batch_id: Option<BatchId>,
}

impl StatusReport {
    pub(crate) fn not_found() -> Self {
        Self {
            status: MessageStatus::NotFound,
            batch_id: None,
        }
    }

    pub(crate) fn queued() -> Self {
        Self {
            status: MessageStatus::Queued,
            batch_id: None,
        }
    }
}

/// A batch retained in the ring.
#[derive(Debug)]
pub(crate) struct BatchRecord<T> {
    pub id: BatchId,
    pub messages: Vec<T>,
    pub status: BatchStatus,
    /// Keys of this batch's messages, captured at cut time so eviction can
    /// clean the key index without re-deriving.
    keys: Vec<String>,
}

/// What a key currently resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySlot {
    /// Queued, no batch id assigned yet.
    Pending,
    Assigned(BatchId),
}

pub(crate) struct BatchHistory<T> {
    capacity: usize,
    /// Monotonic count of cuts; next slot is `cuts % capacity`.
    cuts: u64,
    ring: Vec<Option<BatchRecord<T>>>,
    by_key: HashMap<String, KeySlot>,
    by_id: HashMap<BatchId, usize>,
}

impl<T> BatchHistory<T> {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity >= 1);
        Self {
            capacity,
            cuts: 0,
            ring: (0..capacity).map(|_| None).collect(),
            by_key: HashMap::new(),
            by_id: HashMap::new(),
        }
    }

    /// Mark a key as present in the engine with no batch assigned yet.
    /// Overwrites any previous mapping: when duplicates are allowed, the most
    /// recent queue/batch mapping per key wins.
    pub fn register_pending(&mut self, key: String) {
        self.by_key.insert(key, KeySlot::Pending);
    }

    /// Install a new batch: evict the slot's current occupant, assign a fresh
    /// id, and point every cut key at it. One logical step; at no point does
    /// a stale key or id resolve to the wrong slot.
    pub fn cut_batch(&mut self, entries: Vec<PendingEntry<T>>) -> BatchId {
        let slot = (self.cuts % self.capacity as u64) as usize;
        self.cuts += 1;

        if let Some(evicted) = self.ring[slot].take() {
            for key in &evicted.keys {
                // A key remapped to a newer batch (or back to pending) must
                // survive the eviction of its old batch.
                if self.by_key.get(key) == Some(&KeySlot::Assigned(evicted.id)) {
                    self.by_key.remove(key);
                }
            }
            self.by_id.remove(&evicted.id);
            debug!(batch_id = %evicted.id, slot, "evicted batch from history ring");
        }

        let id = Uuid::new_v4();
        let mut keys = Vec::with_capacity(entries.len());
        let mut messages = Vec::with_capacity(entries.len());
        for entry in entries {
            self.by_key.insert(entry.key.clone(), KeySlot::Assigned(id));
            keys.push(entry.key);
            messages.push(entry.message);
        }
        self.by_id.insert(id, slot);
        self.ring[slot] = Some(BatchRecord {
            id,
            messages,
            status: BatchStatus::Batched,
            keys,
        });
        id
    }

    /// Transition a batch to its terminal status. Returns false when the batch
    /// was evicted before its processing settled, a benign race under a very
    /// small lifespan, not an error.
    pub fn settle(&mut self, id: BatchId, succeeded: bool) -> bool {
        let Some(&slot) = self.by_id.get(&id) else {
            return false;
        };
        match self.ring[slot].as_mut() {
            Some(record) if record.id == id && record.status == BatchStatus::Batched => {
                record.status = if succeeded {
                    BatchStatus::Resolved
                } else {
                    BatchStatus::Rejected
                };
                true
            }
            _ => false,
        }
    }

    pub fn status_by_key(&self, key: &str) -> StatusReport {
        match self.by_key.get(key) {
            None => StatusReport::not_found(),
            Some(KeySlot::Pending) => StatusReport::queued(),
            Some(KeySlot::Assigned(id)) => self.status_by_id(id),
        }
    }

    pub fn status_by_id(&self, id: &BatchId) -> StatusReport {
        let Some(&slot) = self.by_id.get(id) else {
            return StatusReport::not_found();
        };
        match self.ring[slot].as_ref() {
            Some(record) if record.id == *id => StatusReport {
                status: record.status.into(),
                batch_id: Some(record.id),
            },
            _ => StatusReport::not_found(),
        }
    }

    /// Messages of a batch still held in the ring.
    pub fn messages_of(&self, id: &BatchId) -> Option<&[T]> {
        let &slot = self.by_id.get(id)?;
        match self.ring[slot].as_ref() {
            Some(record) if record.id == *id => Some(&record.messages),
            _ => None,
        }
    }

    /// Total number of batches ever cut.
    pub fn cuts(&self) -> u64 {
        self.cuts
    }
}
