//! Configuration Module
//!
//! Handles construction parameters for a cache node, loaded either in code or
//! from environment variables.

use std::env;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Default time the listener waits for a datagram before re-checking for shutdown.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Default bound on a single datagram transmission.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(200);

// == Eviction Policy ==
/// Validated eviction behaviour for a cache instance.
///
/// The TTL variant always carries a capacity bound: expiry is layered on top
/// of LRU tracking, never on a plain map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Plain map, grows without bound
    Unbounded,
    /// Bounded map evicting the least recently used key on overflow
    Lru { max_entries: usize },
    /// Bounded map whose entries also expire `ttl` after their last touch
    LruTtl { max_entries: usize, ttl: Duration },
}

impl EvictionPolicy {
    /// Returns the capacity bound, if any.
    pub fn max_entries(&self) -> Option<usize> {
        match self {
            EvictionPolicy::Unbounded => None,
            EvictionPolicy::Lru { max_entries } | EvictionPolicy::LruTtl { max_entries, .. } => {
                Some(*max_entries)
            }
        }
    }

    /// Returns the entry time-to-live, if any.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            EvictionPolicy::LruTtl { ttl, .. } => Some(*ttl),
            _ => None,
        }
    }
}

/// Cache node configuration parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Logical cache namespace; messages tagged with another name are ignored
    pub name: String,
    /// Local endpoint the listener binds to
    pub listen_address: String,
    /// Destination every mutation is broadcast to
    pub broadcast_address: String,
    /// Capacity bound, None = unbounded
    pub max_entries: Option<usize>,
    /// Entry time-to-live, None = entries never expire
    pub ttl: Option<Duration>,
    /// Interval of the background expiry sweep, None = same as `ttl`
    pub sweep_interval: Option<Duration>,
    /// Bound on each listener wait, keeps cancellation responsive
    pub receive_timeout: Duration,
    /// Bound on each outbound send of the default UDP transport
    pub send_timeout: Duration,
}

impl CacheConfig {
    // == Constructor ==
    /// Creates a configuration for an unbounded cache.
    pub fn new(
        name: impl Into<String>,
        listen_address: impl Into<String>,
        broadcast_address: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            listen_address: listen_address.into(),
            broadcast_address: broadcast_address.into(),
            max_entries: None,
            ttl: None,
            sweep_interval: None,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Bounds the cache to `max_entries` with LRU eviction.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Expires entries `ttl` after their last set or read.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAME` - Logical cache name (default: "cache")
    /// - `LISTEN_ADDRESS` - Listener bind address (default: "0.0.0.0:12345")
    /// - `BROADCAST_ADDRESS` - Broadcast destination (default: "255.255.255.255:12345")
    /// - `MAX_ENTRIES` - Capacity bound (default: unbounded)
    /// - `TTL_SECS` - Entry time-to-live in seconds (default: none)
    /// - `SWEEP_INTERVAL_SECS` - Expiry sweep interval in seconds (default: TTL)
    /// - `SEND_TIMEOUT_MS` - Outbound send bound in milliseconds (default: 200)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            name: env::var("CACHE_NAME").unwrap_or(defaults.name),
            listen_address: env::var("LISTEN_ADDRESS").unwrap_or(defaults.listen_address),
            broadcast_address: env::var("BROADCAST_ADDRESS").unwrap_or(defaults.broadcast_address),
            max_entries: env::var("MAX_ENTRIES").ok().and_then(|v| v.parse().ok()),
            ttl: env::var("TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            sweep_interval: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            receive_timeout: defaults.receive_timeout,
            send_timeout: env::var("SEND_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.send_timeout),
        }
    }

    // == Validation ==
    /// Validates the capacity and TTL parameters into an [`EvictionPolicy`].
    pub fn policy(&self) -> Result<EvictionPolicy> {
        if self.max_entries == Some(0) {
            return Err(CacheError::InvalidConfig(
                "max_entries must be positive".to_string(),
            ));
        }
        if self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(CacheError::InvalidConfig("ttl must be positive".to_string()));
        }
        if self.sweep_interval.is_some_and(|i| i.is_zero()) {
            return Err(CacheError::InvalidConfig(
                "sweep_interval must be positive".to_string(),
            ));
        }
        if self.send_timeout.is_zero() {
            return Err(CacheError::InvalidConfig(
                "send_timeout must be positive".to_string(),
            ));
        }

        match (self.max_entries, self.ttl) {
            (None, None) => Ok(EvictionPolicy::Unbounded),
            (Some(max_entries), None) => Ok(EvictionPolicy::Lru { max_entries }),
            (Some(max_entries), Some(ttl)) => Ok(EvictionPolicy::LruTtl { max_entries, ttl }),
            (None, Some(_)) => Err(CacheError::InvalidConfig(
                "ttl requires max_entries".to_string(),
            )),
        }
    }

    /// Interval for the background expiry sweep, if the policy expires entries.
    pub fn effective_sweep_interval(&self) -> Option<Duration> {
        self.ttl.map(|ttl| self.sweep_interval.unwrap_or(ttl))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new("cache", "0.0.0.0:12345", "255.255.255.255:12345")
    }
}
