//! Meshcache - An embeddable, eventually consistent in-memory cache
//!
//! Every node keeps a local map (optionally LRU-bounded, optionally with TTL
//! expiry) and broadcasts its mutations to peers over UDP. Peers apply them
//! without rebroadcasting, ignoring other cache names and their own echoes.

pub mod cache;
pub mod config;
pub mod error;
pub mod node;
pub mod replication;
mod tasks;
pub mod transport;

pub use cache::{CacheStats, CacheValue};
pub use config::{CacheConfig, EvictionPolicy};
pub use error::{CacheError, Result};
pub use node::{CacheBuilder, DistributedCache};
pub use replication::{ApplyOutcome, NodeId, WireMessage, CLEAN_KEY};
pub use transport::{MemoryNetwork, MemoryTransport, Transport, UdpTransport};
