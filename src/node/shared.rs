//! Shared state of one cache instance.
//!
//! Ties the locked [`CacheStore`] to the user hooks and the replication
//! [`Sender`]. Every operation follows the same shape: mutate under the lock,
//! release it, then notify hooks and peers with the entries it handed back.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::{CacheStats, CacheStore, CacheValue, Filler, Removal, RemoveHook};
use crate::config::EvictionPolicy;
use crate::replication::{NodeId, ReplicaTarget, Sender};

pub(crate) struct CacheCore<V: CacheValue> {
    name: String,
    node_id: NodeId,
    store: Mutex<CacheStore<V>>,
    filler: Option<Filler<V>>,
    remove_hook: Option<RemoveHook<V>>,
    sender: Sender,
}

impl<V: CacheValue> CacheCore<V> {
    pub(crate) fn new(
        name: String,
        node_id: NodeId,
        policy: EvictionPolicy,
        filler: Option<Filler<V>>,
        remove_hook: Option<RemoveHook<V>>,
        sender: Sender,
    ) -> Self {
        Self {
            name,
            node_id,
            store: Mutex::new(CacheStore::new(policy)),
            filler,
            remove_hook,
            sender,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn node_id(&self) -> NodeId {
        self.node_id
    }

    // == Local Operations ==

    pub(crate) async fn get(&self, key: &str) -> Option<V> {
        let (value, expired) = self.store.lock().await.get(key, Instant::now());
        self.settle(expired, true).await;

        if value.is_some() {
            return value;
        }

        // Filler runs on the blocking pool with the lock released.
        let filler = self.filler.clone()?;
        let owned_key = key.to_string();
        match tokio::task::spawn_blocking(move || filler(&owned_key)).await {
            Ok(Ok(filled)) => {
                debug!("Filled missing key {}", key);
                self.set(key.to_string(), Some(filled.clone())).await;
                Some(filled)
            }
            Ok(Err(e)) => {
                warn!("Filler failed for key {}: {:#}", key, e);
                None
            }
            Err(e) => {
                warn!("Filler panicked for key {}: {}", key, e);
                None
            }
        }
    }

    pub(crate) async fn set(&self, key: String, value: Option<V>) {
        let Some(value) = value else {
            self.delete(&key).await;
            return;
        };

        let removed = self
            .store
            .lock()
            .await
            .set(key.clone(), value.clone(), Instant::now());
        self.settle(removed, true).await;
        self.sender.send_set(&key, &value).await;
    }

    pub(crate) async fn delete(&self, key: &str) {
        let removed = self.store.lock().await.delete(key);
        self.settle(removed.into_iter().collect(), false).await;
        self.sender.send_delete(key).await;
    }

    pub(crate) async fn clean(&self) {
        let removed = self.store.lock().await.clear();
        self.notify_cleared(removed);
        self.sender.send_clean().await;
    }

    /// Removes expired entries and propagates them like explicit deletes.
    pub(crate) async fn sweep_expired(&self) -> usize {
        let removed = self.store.lock().await.sweep_expired(Instant::now());
        let count = removed.len();
        self.settle(removed, true).await;
        count
    }

    pub(crate) async fn stats(&self) -> CacheStats {
        self.store.lock().await.stats()
    }

    pub(crate) async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    // == Notification ==

    /// Fires the removal hook for `removed` and, when `broadcast` is set,
    /// sends a delete per removed key.
    async fn settle(&self, removed: Vec<Removal<V>>, broadcast: bool) {
        if removed.is_empty() {
            return;
        }
        let keys: Vec<String> = if broadcast {
            removed.iter().map(|r| r.key.clone()).collect()
        } else {
            Vec::new()
        };

        self.notify_removed(removed);
        for key in keys {
            self.sender.send_delete(&key).await;
        }
    }

    /// Runs the hook for individual removals, in order, on one detached task.
    fn notify_removed(&self, removed: Vec<Removal<V>>) {
        let Some(hook) = self.remove_hook.clone() else {
            return;
        };
        if removed.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for removal in removed {
                hook(&removal.key, &removal.value);
            }
        });
    }

    /// Runs the hook for a clear-all batch, one detached task per entry.
    fn notify_cleared(&self, removed: Vec<Removal<V>>) {
        let Some(hook) = self.remove_hook.as_ref() else {
            return;
        };
        for removal in removed {
            let hook = hook.clone();
            tokio::spawn(async move {
                hook(&removal.key, &removal.value);
            });
        }
    }
}

// == Remote Operations ==
#[async_trait]
impl<V: CacheValue> ReplicaTarget for CacheCore<V> {
    type Value = V;

    fn cache_name(&self) -> &str {
        &self.name
    }

    fn node_id(&self) -> NodeId {
        self.node_id
    }

    async fn apply_remote_set(&self, key: String, value: Option<V>) {
        let now = Instant::now();
        let (expired, removed) = {
            let mut store = self.store.lock().await;
            // Local expirations are swept first so they propagate like any sweep.
            let expired = store.sweep_expired(now);
            let removed = match value {
                Some(value) => store.set(key, value, now),
                None => store.delete(&key).into_iter().collect(),
            };
            (expired, removed)
        };
        self.settle(expired, true).await;
        self.notify_removed(removed);
    }

    async fn apply_remote_clean(&self) {
        let removed = self.store.lock().await.clear();
        self.notify_cleared(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{apply_message, ApplyOutcome, WireMessage};
    use crate::transport::{DatagramReceiver, MemoryNetwork, Transport};
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_millis(50);

    struct Fixture {
        core: CacheCore<String>,
        bus: Box<dyn DatagramReceiver>,
        removed: Arc<StdMutex<Vec<String>>>,
    }

    async fn fixture(policy: EvictionPolicy, filler: Option<Filler<String>>) -> Fixture {
        let network = MemoryNetwork::new();
        let transport = network.transport();
        let bus = transport.bind("bus").await.unwrap();
        let node_id = NodeId::generate();
        let sender = Sender::new(Arc::new(transport), "bus", "test", node_id);

        let removed = Arc::new(StdMutex::new(Vec::new()));
        let sink = removed.clone();
        let hook: RemoveHook<String> = Arc::new(move |key: &str, _value: &String| {
            sink.lock().unwrap().push(key.to_string());
        });

        Fixture {
            core: CacheCore::new("test".to_string(), node_id, policy, filler, Some(hook), sender),
            bus,
            removed,
        }
    }

    async fn drain(bus: &mut Box<dyn DatagramReceiver>) -> Vec<WireMessage<String>> {
        let mut messages = Vec::new();
        while let Some(payload) = bus.receive_datagram(WAIT).await.unwrap() {
            messages.push(WireMessage::decode(&payload).unwrap());
        }
        messages
    }

    async fn settle_hooks() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_set_broadcasts_after_local_write() {
        let mut f = fixture(EvictionPolicy::Unbounded, None).await;

        f.core.set("k".to_string(), Some("v".to_string())).await;

        assert_eq!(f.core.get("k").await.as_deref(), Some("v"));
        let sent = drain(&mut f.bus).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].value.as_deref(), Some("v"));
        assert_eq!(sent[0].origin, f.core.node_id());
    }

    #[tokio::test]
    async fn test_set_absent_is_delete() {
        let mut f = fixture(EvictionPolicy::Unbounded, None).await;
        f.core.set("k".to_string(), Some("v".to_string())).await;

        f.core.set("k".to_string(), None).await;
        settle_hooks().await;

        assert_eq!(f.core.get("k").await, None);
        assert_eq!(*f.removed.lock().unwrap(), vec!["k".to_string()]);
        let sent = drain(&mut f.bus).await;
        assert_eq!(sent.last().map(|m| m.value.is_none()), Some(true));
    }

    #[tokio::test]
    async fn test_delete_of_missing_key_still_broadcasts() {
        let mut f = fixture(EvictionPolicy::Unbounded, None).await;

        f.core.delete("ghost").await;
        settle_hooks().await;

        assert!(f.removed.lock().unwrap().is_empty());
        let sent = drain(&mut f.bus).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, "ghost");
    }

    #[tokio::test]
    async fn test_clean_is_idempotent() {
        let mut f = fixture(EvictionPolicy::Unbounded, None).await;
        f.core.set("a".to_string(), Some("1".to_string())).await;
        f.core.set("b".to_string(), Some("2".to_string())).await;

        f.core.clean().await;
        f.core.clean().await;
        settle_hooks().await;

        assert_eq!(f.core.len().await, 0);
        let mut removed = f.removed.lock().unwrap().clone();
        removed.sort();
        assert_eq!(removed, vec!["a", "b"]);
        let cleans = drain(&mut f.bus).await.into_iter().filter(|m| m.is_clean()).count();
        assert_eq!(cleans, 2);
    }

    #[tokio::test]
    async fn test_eviction_fires_hook_and_broadcasts_delete() {
        let mut f = fixture(EvictionPolicy::Lru { max_entries: 2 }, None).await;
        f.core.set("a".to_string(), Some("1".to_string())).await;
        f.core.set("b".to_string(), Some("2".to_string())).await;
        f.core.get("a").await;

        f.core.set("c".to_string(), Some("3".to_string())).await;
        settle_hooks().await;

        assert_eq!(f.core.get("b").await, None);
        assert_eq!(*f.removed.lock().unwrap(), vec!["b".to_string()]);
        let deletes: Vec<String> = drain(&mut f.bus)
            .await
            .into_iter()
            .filter(|m| m.value.is_none())
            .map(|m| m.key)
            .collect();
        assert_eq!(deletes, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_filler_populates_and_broadcasts() {
        let filler: Filler<String> =
            Arc::new(|key: &str| -> anyhow::Result<String> { Ok(format!("filled-{key}")) });
        let mut f = fixture(EvictionPolicy::Unbounded, Some(filler)).await;

        assert_eq!(f.core.get("k").await.as_deref(), Some("filled-k"));
        assert_eq!(f.core.len().await, 1);

        let sent = drain(&mut f.bus).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].value.as_deref(), Some("filled-k"));
    }

    #[tokio::test]
    async fn test_filler_error_is_a_miss() {
        let filler: Filler<String> = Arc::new(|_key: &str| -> anyhow::Result<String> {
            Err(anyhow::anyhow!("backend down"))
        });
        let mut f = fixture(EvictionPolicy::Unbounded, Some(filler)).await;

        assert_eq!(f.core.get("k").await, None);
        assert_eq!(f.core.len().await, 0);
        assert!(drain(&mut f.bus).await.is_empty());
    }

    #[tokio::test]
    async fn test_remote_apply_never_broadcasts() {
        let mut f = fixture(EvictionPolicy::Lru { max_entries: 1 }, None).await;
        let peer = NodeId::generate();

        let outcome =
            apply_message(&f.core, WireMessage::set("test", "a", "1".to_string(), peer)).await;
        apply_message(&f.core, WireMessage::set("test", "b", "2".to_string(), peer)).await;
        apply_message(&f.core, WireMessage::delete("test", "b", peer)).await;
        settle_hooks().await;

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(f.core.len().await, 0);
        // Eviction of "a" and deletion of "b" still fire locally
        let mut removed = f.removed.lock().unwrap().clone();
        removed.sort();
        assert_eq!(removed, vec!["a", "b"]);
        assert!(drain(&mut f.bus).await.is_empty());
    }

    #[tokio::test]
    async fn test_own_echo_leaves_state_untouched() {
        let f = fixture(EvictionPolicy::Unbounded, None).await;

        let outcome = apply_message(
            &f.core,
            WireMessage::set("test", "k", "v".to_string(), f.core.node_id()),
        )
        .await;

        assert_eq!(outcome, ApplyOutcome::OwnEcho);
        assert_eq!(f.core.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_set_broadcasts_local_expirations() {
        let policy = EvictionPolicy::LruTtl {
            max_entries: 10,
            ttl: Duration::from_secs(2),
        };
        let mut f = fixture(policy, None).await;
        f.core.set("k".to_string(), Some("v".to_string())).await;
        drain(&mut f.bus).await;

        tokio::time::advance(Duration::from_secs(3)).await;
        let peer = NodeId::generate();
        apply_message(&f.core, WireMessage::set("test", "x", "1".to_string(), peer)).await;
        settle_hooks().await;

        assert_eq!(f.core.len().await, 1);
        assert_eq!(*f.removed.lock().unwrap(), vec!["k".to_string()]);
        // Only the expiry goes out; the applied set itself is not rebroadcast
        let sent = drain(&mut f.bus).await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].key, "k");
        assert!(sent[0].value.is_none());
    }

    #[tokio::test]
    async fn test_blocking_filler_does_not_stall_runtime() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let ran = Arc::new(AtomicBool::new(false));
        let seen = ran.clone();
        let filler: Filler<String> = Arc::new(move |_key: &str| -> anyhow::Result<String> {
            std::thread::sleep(Duration::from_millis(200));
            Ok(seen.load(Ordering::SeqCst).to_string())
        });
        let f = fixture(EvictionPolicy::Unbounded, Some(filler)).await;

        // Single-threaded runtime: this task only runs if the filler is off-thread.
        let flag = ran.clone();
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        assert_eq!(f.core.get("k").await.as_deref(), Some("true"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_broadcasts_expired_keys() {
        let policy = EvictionPolicy::LruTtl {
            max_entries: 10,
            ttl: Duration::from_secs(2),
        };
        let mut f = fixture(policy, None).await;
        f.core.set("b".to_string(), Some("2".to_string())).await;
        f.core.set("a".to_string(), Some("1".to_string())).await;
        drain(&mut f.bus).await;

        tokio::time::advance(Duration::from_secs(3)).await;
        let swept = f.core.sweep_expired().await;
        settle_hooks().await;

        assert_eq!(swept, 2);
        assert_eq!(*f.removed.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);
        let deletes: Vec<String> = drain(&mut f.bus).await.into_iter().map(|m| m.key).collect();
        assert_eq!(deletes, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(f.core.stats().await.expirations, 2);
    }
}
