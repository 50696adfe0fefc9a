//! Simulated per-cache residency of leaf blocks.
//!
//! Each cache keeps an LRU list of the blocks its workers touched. The
//! executor only uses it to pick ready tasks whose output is likely warm;
//! no data moves.

use std::collections::VecDeque;

use flashmat_core::BlockKey;

/// LRU set of block keys with a fixed capacity in blocks.
#[derive(Debug, Clone)]
pub struct CacheState {
    capacity: usize,
    /// Most recently used at the front.
    lru: VecDeque<BlockKey>,
}

impl CacheState {
    /// Create an empty cache holding up to `capacity` blocks.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lru: VecDeque::with_capacity(capacity),
        }
    }

    /// Maximum number of resident blocks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident blocks.
    pub fn len(&self) -> usize {
        self.lru.len()
    }

    /// Check if no block is resident.
    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }

    /// Check if `key` is resident.
    pub fn contains(&self, key: &BlockKey) -> bool {
        self.lru.contains(key)
    }

    /// Mark `key` as most recently used, evicting the least recently used
    /// block if full. Returns `true` on a hit.
    pub fn touch(&mut self, key: &BlockKey) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            if let Some(k) = self.lru.remove(pos) {
                self.lru.push_front(k);
            }
            return true;
        }
        if self.lru.len() == self.capacity {
            self.lru.pop_back();
        }
        self.lru.push_front(*key);
        false
    }

    /// Drop `key` if resident.
    pub fn invalidate(&mut self, key: &BlockKey) {
        self.lru.retain(|k| k != key);
    }
}
