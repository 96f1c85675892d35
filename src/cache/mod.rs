//! Cache Module
//!
//! Provides the local storage engine: a plain map with optional LRU eviction
//! and TTL expiration layered on top.

mod expiry;
mod lru;
mod stats;
mod store;


use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

// Re-export public types
pub use expiry::ExpiryTracker;
pub use lru::LruTracker;
pub use stats::CacheStats;
pub use store::{CacheStore, Removal, RemovalCause};

// == Value Bound ==
/// Anything that can be stored locally and shipped to peers.
///
/// Values that serialize to JSON `null` cannot be told apart from an absent
/// value on the wire and must not be stored.
pub trait CacheValue: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> CacheValue for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

// == Hooks ==
/// Computes a value for a key missing from the cache.
pub type Filler<V> = Arc<dyn Fn(&str) -> anyhow::Result<V> + Send + Sync>;

/// Called once for every entry that leaves the cache, whatever the cause.
pub type RemoveHook<V> = Arc<dyn Fn(&str, &V) + Send + Sync>;
