//! TTL Sweep Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheValue;
use crate::node::CacheCore;

/// Spawns a background task that periodically sweeps expired entries.
///
/// Each sweep goes through the regular removal path, so the removal hook
/// fires and a delete is broadcast for every expired key. The task stops
/// when `shutdown` carries `true` or its sender is dropped.
pub(crate) fn spawn_sweep_task<V: CacheValue>(
    core: Arc<CacheCore<V>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting TTL sweep for cache {} every {:?}",
            core.name(),
            interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            let removed = core.sweep_expired().await;
            if removed > 0 {
                info!("TTL sweep: removed {} expired entries", removed);
            } else {
                debug!("TTL sweep: no expired entries found");
            }
        }

        debug!("TTL sweep stopped for cache {}", core.name());
    })
}
