//! Node Module
//!
//! Lifecycle of a cache instance: construction mints a node identity, binds
//! the listening endpoint and starts the listener (plus the TTL sweep when
//! entries expire); [`DistributedCache::stop`] cancels them.

mod shared;

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{CacheStats, CacheValue, Filler, RemoveHook};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::replication::{apply_message, ApplyOutcome, Listener, NodeId, Sender, WireMessage};
use crate::tasks::spawn_sweep_task;
use crate::transport::{Transport, UdpTransport};

pub(crate) use shared::CacheCore;

// == Builder ==
/// Collects the optional collaborators of a cache node before starting it.
pub struct CacheBuilder<V: CacheValue> {
    config: CacheConfig,
    filler: Option<Filler<V>>,
    remove_hook: Option<RemoveHook<V>>,
    transport: Option<Arc<dyn Transport>>,
}

impl<V: CacheValue> CacheBuilder<V> {
    fn new(config: CacheConfig) -> Self {
        Self {
            config,
            filler: None,
            remove_hook: None,
            transport: None,
        }
    }

    /// Computes values for keys missing on a local read.
    pub fn filler<F>(mut self, filler: F) -> Self
    where
        F: Fn(&str) -> anyhow::Result<V> + Send + Sync + 'static,
    {
        self.filler = Some(Arc::new(filler));
        self
    }

    /// Observes every entry leaving the cache (delete, clean, eviction, expiry).
    ///
    /// The hook runs on a detached task and may call back into the cache.
    pub fn remove_hook<H>(mut self, hook: H) -> Self
    where
        H: Fn(&str, &V) + Send + Sync + 'static,
    {
        self.remove_hook = Some(Arc::new(hook));
        self
    }

    /// Replaces the default [`UdpTransport`].
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    // == Start ==
    /// Binds the listening endpoint and starts the background tasks.
    ///
    /// Fails if the configuration is invalid or the endpoint cannot be bound.
    /// Does not wait for the listener to be polling: datagrams sent by peers
    /// in the first instants may be missed.
    pub async fn start(self) -> Result<DistributedCache<V>> {
        let policy = self.config.policy()?;
        let transport = self
            .transport
            .unwrap_or_else(|| {
                Arc::new(UdpTransport::with_send_timeout(self.config.send_timeout))
                    as Arc<dyn Transport>
            });
        let node_id = NodeId::generate();

        let receiver = transport.bind(&self.config.listen_address).await?;

        let sender = Sender::new(
            transport,
            self.config.broadcast_address.clone(),
            self.config.name.clone(),
            node_id,
        );
        let core = Arc::new(CacheCore::new(
            self.config.name.clone(),
            node_id,
            policy,
            self.filler,
            self.remove_hook,
            sender,
        ));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut tasks = vec![tokio::spawn(
            Listener::new(receiver, core.clone(), self.config.receive_timeout)
                .run(shutdown_rx.clone()),
        )];
        if let Some(interval) = self.config.effective_sweep_interval() {
            tasks.push(spawn_sweep_task(core.clone(), interval, shutdown_rx));
        }

        info!(
            "Cache {} started as node {} on {} ({:?})",
            self.config.name, node_id, self.config.listen_address, policy
        );

        Ok(DistributedCache {
            core,
            shutdown,
            tasks: Mutex::new(tasks),
        })
    }
}

// == Distributed Cache ==
/// Handle to one running cache node.
///
/// Reads and writes are local and take effect immediately; writes are also
/// broadcast to peers on a best-effort basis. No operation fails because of
/// the network.
pub struct DistributedCache<V: CacheValue> {
    core: Arc<CacheCore<V>>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<V: CacheValue> DistributedCache<V> {
    pub fn builder(config: CacheConfig) -> CacheBuilder<V> {
        CacheBuilder::new(config)
    }

    /// Starts a node over UDP with no filler and no removal hook.
    pub async fn start(config: CacheConfig) -> Result<Self> {
        Self::builder(config).start().await
    }

    // == Get ==
    /// Returns the value for `key`, consulting the filler on a miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        self.core.get(key).await
    }

    // == Set ==
    /// Stores `value` under `key` and broadcasts it. An absent value deletes.
    pub async fn set(&self, key: impl Into<String>, value: impl Into<Option<V>>) {
        self.core.set(key.into(), value.into()).await
    }

    // == Delete ==
    pub async fn delete(&self, key: &str) {
        self.core.delete(key).await
    }

    // == Clean ==
    /// Removes every entry here and asks peers to do the same.
    pub async fn clean(&self) {
        self.core.clean().await
    }

    // == Stop ==
    /// Signals cancellation and waits for the background tasks to exit.
    ///
    /// The listening endpoint is released once this returns. Calling it again
    /// is a no-op.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
        info!("Cache {} stopped", self.core.name());
    }

    /// True until [`stop`](Self::stop) is called or a background task exits
    /// on its own, e.g. the listener losing its endpoint.
    pub fn is_running(&self) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        let tasks = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !tasks.is_empty() && tasks.iter().all(|task| !task.is_finished())
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn node_id(&self) -> NodeId {
        self.core.node_id()
    }

    pub async fn len(&self) -> usize {
        self.core.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        self.core.stats().await
    }

    /// Runs `message` through the listener's filter-and-apply path.
    pub async fn apply_message(&self, message: WireMessage<V>) -> ApplyOutcome {
        apply_message(self.core.as_ref(), message).await
    }
}

impl<V: CacheValue> Drop for DistributedCache<V> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
