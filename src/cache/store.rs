//! Cache Store Module
//!
//! Main cache engine combining HashMap storage with optional LRU tracking and
//! TTL expiration.
//!
//! The store is a plain synchronous state machine. It never broadcasts and
//! never calls user hooks: every mutating method hands back the entries it
//! removed so the caller can notify hooks and peers after releasing its lock.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::cache::{CacheStats, ExpiryTracker, LruTracker};
use crate::config::EvictionPolicy;

// == Removal ==
/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Explicit delete, or a set to an absent value
    Deleted,
    /// Part of a clear-all
    Cleared,
    /// Least recently used entry pushed out by an insert at capacity
    Evicted,
    /// TTL elapsed
    Expired,
}

/// An entry removed from the store, with its last value.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal<V> {
    pub key: String,
    pub value: V,
    pub cause: RemovalCause,
}

// == Cache Store ==
/// Key-value storage with the eviction layers selected by an [`EvictionPolicy`].
///
/// Invariants held after every operation:
/// - with LRU, the tracked keys are exactly the keys of `entries`
/// - with LRU, `entries.len() <= max_entries`
/// - with TTL, every key of `entries` carries a deadline
#[derive(Debug)]
pub struct CacheStore<V> {
    /// Key-value storage
    entries: HashMap<String, V>,
    /// Recency order, present for bounded policies
    lru: Option<LruTracker>,
    /// Capacity bound, present for bounded policies
    max_entries: Option<usize>,
    /// Expiry deadlines, present for TTL policies
    expiry: Option<ExpiryTracker>,
    /// Local statistics
    stats: CacheStats,
}

impl<V: Clone> CacheStore<V> {
    // == Constructor ==
    /// Creates an empty store for the given eviction policy.
    pub fn new(policy: EvictionPolicy) -> Self {
        let max_entries = policy.max_entries();
        Self {
            entries: HashMap::new(),
            lru: max_entries.map(|_| LruTracker::new()),
            max_entries,
            expiry: policy.ttl().map(ExpiryTracker::new),
            stats: CacheStats::new(),
        }
    }

    // == Get ==
    /// Looks a key up, touching its recency and refreshing its TTL on a hit.
    ///
    /// Expired entries are swept first, so a key past its deadline is never
    /// served. Returns the value plus whatever the sweep removed.
    pub fn get(&mut self, key: &str, now: Instant) -> (Option<V>, Vec<Removal<V>>) {
        let expired = self.sweep_expired(now);

        let value = self.entries.get(key).cloned();
        if value.is_some() {
            self.stats.record_hit();
            self.touch(key, now);
        } else {
            self.stats.record_miss();
        }
        (value, expired)
    }

    // == Set ==
    /// Inserts or overwrites an entry.
    ///
    /// Expired entries are reclaimed before the capacity check, so an insert
    /// at capacity only evicts a live entry when nothing has expired. Returns
    /// every entry removed along the way, expirations first.
    pub fn set(&mut self, key: String, value: V, now: Instant) -> Vec<Removal<V>> {
        let mut removed = self.sweep_expired(now);

        if !self.entries.contains_key(&key) {
            if let Some(evicted) = self.evict_if_full() {
                removed.push(evicted);
            }
        }

        self.entries.insert(key.clone(), value);
        self.touch(&key, now);
        removed
    }

    // == Delete ==
    /// Removes an entry by key, returning it if it was present.
    pub fn delete(&mut self, key: &str) -> Option<Removal<V>> {
        self.remove_entry(key, RemovalCause::Deleted)
    }

    // == Clear ==
    /// Removes every entry.
    pub fn clear(&mut self) -> Vec<Removal<V>> {
        if let Some(lru) = self.lru.as_mut() {
            lru.clear();
        }
        if let Some(expiry) = self.expiry.as_mut() {
            expiry.clear();
        }
        self.entries
            .drain()
            .map(|(key, value)| Removal {
                key,
                value,
                cause: RemovalCause::Cleared,
            })
            .collect()
    }

    // == Sweep Expired ==
    /// Removes every entry whose deadline has passed, in key order.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<Removal<V>> {
        let Some(expiry) = self.expiry.as_ref() else {
            return Vec::new();
        };

        let mut removed = Vec::new();
        for key in expiry.expired_keys(now) {
            if let Some(removal) = self.remove_entry(&key, RemovalCause::Expired) {
                self.stats.record_expiration();
                removed.push(removal);
            }
        }
        removed
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    #[cfg(test)]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Consistency ==
    /// Checks the structural invariants between the table and its trackers.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        let lru_ok = self.lru.as_ref().map_or(true, |lru| {
            lru.len() == self.entries.len()
                && lru.keys_oldest_first().all(|k| self.entries.contains_key(k))
        });
        let bound_ok = self
            .max_entries
            .map_or(true, |max| self.entries.len() <= max);
        let expiry_ok = self.expiry.as_ref().map_or(true, |expiry| {
            expiry.len() == self.entries.len()
                && self.entries.keys().all(|k| expiry.contains(k))
        });
        lru_ok && bound_ok && expiry_ok
    }

    // == Internals ==
    fn touch(&mut self, key: &str, now: Instant) {
        if let Some(lru) = self.lru.as_mut() {
            lru.touch(key);
        }
        if let Some(expiry) = self.expiry.as_mut() {
            expiry.refresh(key, now);
        }
    }

    fn evict_if_full(&mut self) -> Option<Removal<V>> {
        let max = self.max_entries?;
        if self.entries.len() < max {
            return None;
        }

        let victim = match self.lru.as_mut().and_then(LruTracker::evict_oldest) {
            Some(key) => key,
            None => unreachable!("lru order out of sync with a full table"),
        };
        let removal = self.remove_entry(&victim, RemovalCause::Evicted);
        if removal.is_some() {
            self.stats.record_eviction();
        }
        removal
    }

    fn remove_entry(&mut self, key: &str, cause: RemovalCause) -> Option<Removal<V>> {
        let value = self.entries.remove(key)?;
        if let Some(lru) = self.lru.as_mut() {
            lru.remove(key);
        }
        if let Some(expiry) = self.expiry.as_mut() {
            expiry.remove(key);
        }
        Some(Removal {
            key: key.to_string(),
            value,
            cause,
        })
    }
}
