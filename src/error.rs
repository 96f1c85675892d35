//! Error types for the replicated cache
//!
//! Provides unified error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the replicated cache.
///
/// Cache operations themselves never fail; these errors come from
/// construction and from the transport and codec collaborators.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Socket-level failure (bind, send, receive)
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The transport endpoint is gone
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// Wire message could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Encoded message does not fit in a single datagram
    #[error("Datagram too large: {0} bytes")]
    DatagramTooLarge(usize),

    /// Datagram transmission did not complete in time
    #[error("Send timed out after {0:?}")]
    SendTimeout(Duration),

    /// Rejected construction parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// == Result Type Alias ==
/// Convenience Result type for the replicated cache.
pub type Result<T> = std::result::Result<T, CacheError>;
