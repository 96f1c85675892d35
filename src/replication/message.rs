//! Wire Message Module
//!
//! The record exchanged between nodes and its JSON encoding.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Reserved key that, paired with an absent value, means "clear everything".
///
/// User keys must never equal this string.
pub const CLEAN_KEY: &str = "<clean>";

// == Node Identity ==
/// Identifier minted once per cache instance, used to discard its own echoes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// == Wire Message ==
/// A replicated mutation.
///
/// - `value` present: set `key` to `value`
/// - `value` absent: delete `key`
/// - `value` absent and `key == CLEAN_KEY`: clear the whole cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage<V> {
    pub cache_name: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<V>,
    pub origin: NodeId,
}

impl<V> WireMessage<V> {
    pub fn set(cache_name: &str, key: &str, value: V, origin: NodeId) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            key: key.to_string(),
            value: Some(value),
            origin,
        }
    }

    pub fn delete(cache_name: &str, key: &str, origin: NodeId) -> Self {
        Self {
            cache_name: cache_name.to_string(),
            key: key.to_string(),
            value: None,
            origin,
        }
    }

    pub fn clean(cache_name: &str, origin: NodeId) -> Self {
        Self::delete(cache_name, CLEAN_KEY, origin)
    }

    /// Returns true if the message asks peers to clear everything.
    pub fn is_clean(&self) -> bool {
        self.key == CLEAN_KEY && self.value.is_none()
    }
}

impl<V: Serialize> WireMessage<V> {
    /// Serializes the message into a datagram payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<V: for<'de> Deserialize<'de>> WireMessage<V> {
    /// Parses a datagram payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
