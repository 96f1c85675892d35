//! Expiry Tracker Module
//!
//! Tracks per-key expiry deadlines for TTL eviction.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tokio::time::Instant;

// == Expiry Tracker ==
/// Holds an absolute deadline for every live key of a TTL cache.
///
/// Deadlines are indexed twice so the expired prefix can be collected without
/// scanning every key:
/// - `deadlines` maps key -> deadline
/// - `queue` orders (deadline, key) pairs, earliest first
#[derive(Debug)]
pub struct ExpiryTracker {
    ttl: Duration,
    deadlines: HashMap<String, Instant>,
    queue: BTreeSet<(Instant, String)>,
}

impl ExpiryTracker {
    // == Constructor ==
    /// Creates an empty tracker applying `ttl` to every refreshed key.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            deadlines: HashMap::new(),
            queue: BTreeSet::new(),
        }
    }

    // == Refresh ==
    /// Sets the key's deadline to `now + ttl`.
    pub fn refresh(&mut self, key: &str, now: Instant) {
        let deadline = now + self.ttl;
        if let Some(previous) = self.deadlines.insert(key.to_string(), deadline) {
            self.queue.remove(&(previous, key.to_string()));
        }
        self.queue.insert((deadline, key.to_string()));
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        if let Some(deadline) = self.deadlines.remove(key) {
            self.queue.remove(&(deadline, key.to_string()));
        }
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.queue.clear();
    }

    // == Expired Keys ==
    /// Returns every expired key, sorted by key for deterministic removal order.
    ///
    /// Boundary condition: a key is expired once `now >= deadline`, so the
    /// entry is gone as soon as the full TTL has elapsed.
    pub fn expired_keys(&self, now: Instant) -> Vec<String> {
        let mut keys: Vec<String> = self
            .queue
            .iter()
            .take_while(|(deadline, _)| now >= *deadline)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.deadlines.contains_key(key)
    }
}
