//! Transport Module
//!
//! The datagram capabilities the replication engine depends on: send one
//! payload to a destination, and receive the next payload or time out.
//!
//! # Implementations
//! - [`UdpTransport`]: tokio UDP sockets, broadcast-capable
//! - [`MemoryTransport`]: in-process delivery over a shared [`MemoryNetwork`]

mod memory;
mod udp;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

/// Largest payload that fits in a single UDP datagram over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

// == Transport ==
/// Factory for listening endpoints plus the one-shot send path.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Binds a listening endpoint at `address`.
    async fn bind(&self, address: &str) -> Result<Box<dyn DatagramReceiver>>;

    /// Sends one datagram to `destination`. Fire-and-forget: success only
    /// means the payload left this node.
    async fn send_datagram(&self, destination: &str, payload: &[u8]) -> Result<()>;
}

// == Datagram Receiver ==
/// A bound listening endpoint, owned by exactly one listener.
#[async_trait]
pub trait DatagramReceiver: Send {
    /// Waits up to `timeout` for the next datagram. `Ok(None)` means the
    /// timeout elapsed with nothing received.
    async fn receive_datagram(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Releases the endpoint. Further receives fail.
    async fn close(&mut self) -> Result<()>;
}
