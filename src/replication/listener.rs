//! Inbound half of replication: applies peers' broadcasts to local state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::CacheValue;
use crate::error::CacheError;
use crate::replication::{NodeId, WireMessage};
use crate::transport::DatagramReceiver;

// == Replica Target ==
/// Local state a listener writes remote mutations into.
///
/// Implementations must not rebroadcast the applied mutation: a remote
/// mutation travels exactly one hop from its origin.
#[async_trait]
pub trait ReplicaTarget: Send + Sync + 'static {
    type Value: CacheValue;

    fn cache_name(&self) -> &str;

    fn node_id(&self) -> NodeId;

    /// Applies a set, or a delete when `value` is absent.
    async fn apply_remote_set(&self, key: String, value: Option<Self::Value>);

    /// Applies a clear-all.
    async fn apply_remote_clean(&self);
}

/// What the listener did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Written into local state
    Applied,
    /// Tagged with another cache name
    ForeignCache,
    /// Originated from this very node
    OwnEcho,
}

// == Apply ==
/// Filters a message by cache name and origin, then applies it.
pub async fn apply_message<T>(target: &T, message: WireMessage<T::Value>) -> ApplyOutcome
where
    T: ReplicaTarget + ?Sized,
{
    if message.cache_name != target.cache_name() {
        return ApplyOutcome::ForeignCache;
    }
    if message.origin == target.node_id() {
        return ApplyOutcome::OwnEcho;
    }

    if message.is_clean() {
        target.apply_remote_clean().await;
    } else {
        target.apply_remote_set(message.key, message.value).await;
    }
    ApplyOutcome::Applied
}

/// Decodes and applies one datagram. Malformed payloads are dropped.
pub async fn handle_datagram<T>(target: &T, payload: &[u8]) -> Option<ApplyOutcome>
where
    T: ReplicaTarget + ?Sized,
{
    let message = match WireMessage::<T::Value>::decode(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("Dropping malformed datagram ({} bytes): {}", payload.len(), e);
            return None;
        }
    };

    let key = message.key.clone();
    let outcome = apply_message(target, message).await;
    debug!("Inbound update for key {}: {:?}", key, outcome);
    Some(outcome)
}

// == Listener ==
/// Receive loop bound to one endpoint.
///
/// States are running and stopped; the only transition happens when the
/// shutdown signal fires, after which the endpoint is closed and the loop
/// never restarts.
pub struct Listener<T: ReplicaTarget> {
    receiver: Box<dyn DatagramReceiver>,
    target: Arc<T>,
    receive_timeout: Duration,
}

impl<T: ReplicaTarget> Listener<T> {
    pub fn new(receiver: Box<dyn DatagramReceiver>, target: Arc<T>, receive_timeout: Duration) -> Self {
        Self {
            receiver,
            target,
            receive_timeout,
        }
    }

    /// Runs until `shutdown` carries `true` or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Listener started for cache {} (node {})",
            self.target.cache_name(),
            self.target.node_id()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let received = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = self.receiver.receive_datagram(self.receive_timeout) => received,
            };

            match received {
                Ok(Some(payload)) => {
                    handle_datagram(self.target.as_ref(), &payload).await;
                }
                Ok(None) => {}
                Err(CacheError::TransportClosed(endpoint)) => {
                    warn!("Listener endpoint {} closed underneath it", endpoint);
                    break;
                }
                Err(e) => {
                    warn!("Listener receive failed: {}", e);
                    tokio::time::sleep(self.receive_timeout).await;
                }
            }
        }

        if let Err(e) = self.receiver.close().await {
            warn!("Failed to close listener endpoint: {}", e);
        }
        info!("Listener stopped for cache {}", self.target.cache_name());
    }
}
