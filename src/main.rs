//! Meshcache demo node
//!
//! Starts one replicated cache node from environment configuration, logs
//! every removal, and runs until interrupted.

use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meshcache::{CacheConfig, DistributedCache};

/// Main entry point for a demo cache node.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Start the cache node (binds the listener, starts the TTL sweep)
/// 4. Wait for SIGINT/SIGTERM, then stop the node
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshcache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CacheConfig::from_env();
    info!(
        "Configuration loaded: name={}, listen={}, broadcast={}, max_entries={:?}, ttl={:?}",
        config.name, config.listen_address, config.broadcast_address, config.max_entries, config.ttl
    );

    let cache = DistributedCache::<String>::builder(config)
        .remove_hook(|key, value| info!("Removed {} (last value {:?})", key, value))
        .start()
        .await?;
    info!("Node {} ready", cache.node_id());

    shutdown_signal().await;

    cache.stop().await;
    info!("Node shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
