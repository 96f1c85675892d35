//! Outbound half of replication: turns local mutations into broadcasts.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::replication::{NodeId, WireMessage};
use crate::transport::Transport;

// == Sender ==
/// Broadcasts this node's mutations, tagged with its cache name and identity.
///
/// Every send is best effort. Failures are logged and never reach the
/// operation that triggered them.
#[derive(Clone)]
pub struct Sender {
    transport: Arc<dyn Transport>,
    destination: String,
    cache_name: String,
    origin: NodeId,
}

impl Sender {
    pub fn new(
        transport: Arc<dyn Transport>,
        destination: impl Into<String>,
        cache_name: impl Into<String>,
        origin: NodeId,
    ) -> Self {
        Self {
            transport,
            destination: destination.into(),
            cache_name: cache_name.into(),
            origin,
        }
    }

    pub async fn send_set<V: Serialize + Clone>(&self, key: &str, value: &V) {
        let message = WireMessage::set(&self.cache_name, key, value.clone(), self.origin);
        self.send(&message).await;
    }

    pub async fn send_delete(&self, key: &str) {
        let message = WireMessage::<()>::delete(&self.cache_name, key, self.origin);
        self.send(&message).await;
    }

    pub async fn send_clean(&self) {
        let message = WireMessage::<()>::clean(&self.cache_name, self.origin);
        self.send(&message).await;
    }

    async fn send<V: Serialize>(&self, message: &WireMessage<V>) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode message for key {}: {}", message.key, e);
                return;
            }
        };

        match self
            .transport
            .send_datagram(&self.destination, &payload)
            .await
        {
            Ok(()) => debug!(
                "Sent {} bytes for key {} to {}",
                payload.len(),
                message.key,
                self.destination
            ),
            Err(e) => warn!(
                "Failed to send update for key {} to {}: {}",
                message.key, self.destination, e
            ),
        }
    }
}
