//! In-process transport for running several nodes in one process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{CacheError, Result};
use crate::transport::{DatagramReceiver, Transport, MAX_DATAGRAM_SIZE};

/// Datagrams buffered per address before slow receivers start losing them.
const ENDPOINT_CAPACITY: usize = 1024;

// == Memory Network ==
/// Shared address space for [`MemoryTransport`]s.
///
/// Every receiver bound to an address gets every datagram sent to it, which
/// models a broadcast segment. Sends to an address nobody listens on are
/// dropped, like UDP.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<String, broadcast::Sender<Vec<u8>>>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport attached to this network.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
        }
    }

    fn subscribe(&self, address: &str) -> broadcast::Receiver<Vec<u8>> {
        let mut endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        endpoints
            .entry(address.to_string())
            .or_insert_with(|| broadcast::channel(ENDPOINT_CAPACITY).0)
            .subscribe()
    }

    /// Every receiver on an address closed: the endpoint is dropped from the
    /// map and the datagram is lost.
    fn deliver(&self, address: &str, payload: &[u8]) {
        let mut endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match endpoints.get(address).map(|endpoint| endpoint.receiver_count()) {
            Some(0) => {
                endpoints.remove(address);
            }
            Some(_) => {
                if let Some(endpoint) = endpoints.get(address) {
                    let _ = endpoint.send(payload.to_vec());
                }
            }
            None => {}
        }
    }

    #[cfg(test)]
    fn has_endpoint(&self, address: &str) -> bool {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(address)
    }
}

// == Memory Transport ==
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn new(network: &MemoryNetwork) -> Self {
        network.transport()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn bind(&self, address: &str) -> Result<Box<dyn DatagramReceiver>> {
        Ok(Box::new(MemoryReceiver {
            address: address.to_string(),
            inbox: Some(self.network.subscribe(address)),
        }))
    }

    async fn send_datagram(&self, destination: &str, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_DATAGRAM_SIZE {
            return Err(CacheError::DatagramTooLarge(payload.len()));
        }
        self.network.deliver(destination, payload);
        Ok(())
    }
}

// == Memory Receiver ==
struct MemoryReceiver {
    address: String,
    inbox: Option<broadcast::Receiver<Vec<u8>>>,
}

#[async_trait]
impl DatagramReceiver for MemoryReceiver {
    async fn receive_datagram(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let inbox = self
            .inbox
            .as_mut()
            .ok_or_else(|| CacheError::TransportClosed(self.address.clone()))?;

        match tokio::time::timeout(timeout, inbox.recv()).await {
            Ok(Ok(payload)) => Ok(Some(payload)),
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!("Receiver on {} dropped {} datagrams", self.address, skipped);
                Ok(None)
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                Err(CacheError::TransportClosed(self.address.clone()))
            }
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.inbox.take();
        Ok(())
    }
}
