//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for cache eviction.

use std::collections::{BTreeMap, HashMap};

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Every touch stamps the key with a monotonically increasing tick:
/// - `stamps` maps key -> its current tick
/// - `order` maps tick -> key, so the first entry is the least recently used
///
/// Touch, remove and evict are all O(log n).
#[derive(Debug, Default)]
pub struct LruTracker {
    stamps: HashMap<String, u64>,
    order: BTreeMap<u64, String>,
    tick: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used, inserting it if it is new.
    pub fn touch(&mut self, key: &str) {
        self.tick += 1;
        match self.stamps.get_mut(key) {
            Some(stamp) => {
                self.order.remove(stamp);
                *stamp = self.tick;
            }
            None => {
                self.stamps.insert(key.to_string(), self.tick);
            }
        }
        self.order.insert(self.tick, key.to_string());
    }

    // == Remove ==
    /// Removes a key from the tracker. Unknown keys are ignored.
    pub fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&stamp);
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.stamps.remove(&key);
        Some(key)
    }

    /// Drops every tracked key.
    pub fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
    }

    /// Tracked keys from least to most recently used.
    #[cfg(test)]
    pub fn keys_oldest_first(&self) -> impl Iterator<Item = &str> {
        self.order.values().map(String::as_str)
    }

    // == Length ==
    /// Returns the number of tracked keys.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }
}
