//! Bounded FIFO of keyed items
//!
//! Index separation as in the packet buffers: the ring holds only the sync
//! key and a slab key, the slab holds the items themselves.

use std::fmt;

use contracts::SyncKey;
use ringbuf::{traits::*, HeapRb};
use slab::Slab;

#[derive(Debug, Clone, Copy)]
struct Entry {
    key: SyncKey,
    slab_key: usize,
}

/// Insertion-ordered queue of `(SyncKey, V)`
pub(crate) struct KeyedQueue<V> {
    index: HeapRb<Entry>,
    storage: Slab<V>,
}

impl<V> fmt::Debug for KeyedQueue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedQueue")
            .field("len", &self.index.occupied_len())
            .field("keys", &self.keys())
            .finish()
    }
}

impl<V> KeyedQueue<V> {
    /// Queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            index: HeapRb::new(capacity),
            storage: Slab::with_capacity(capacity),
        }
    }

    /// Append an item; gives it back when the queue is full
    pub fn push(&mut self, key: SyncKey, value: V) -> Result<(), V> {
        if self.index.is_full() {
            return Err(value);
        }
        let slab_key = self.storage.insert(value);
        let _ = self.index.try_push(Entry { key, slab_key });
        Ok(())
    }

    /// Key of the oldest item
    pub fn front_key(&self) -> Option<SyncKey> {
        self.index.iter().next().map(|e| e.key)
    }

    /// Remove the oldest item
    pub fn pop(&mut self) -> Option<(SyncKey, V)> {
        let entry = self.index.try_pop()?;
        let value = self.storage.try_remove(entry.slab_key)?;
        Some((entry.key, value))
    }

    /// Remove everything, oldest first
    pub fn drain(&mut self) -> Vec<(SyncKey, V)> {
        let mut items = Vec::with_capacity(self.len());
        while let Some(item) = self.pop() {
            items.push(item);
        }
        items
    }

    pub fn keys(&self) -> Vec<SyncKey> {
        self.index.iter().map(|e| e.key).collect()
    }

    pub fn len(&self) -> usize {
        self.index.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
