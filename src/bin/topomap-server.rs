//! topomap standalone server.
//!
//! Wires the full serve path: fixture client, topology manager, event
//! logger, background snapshot worker, HTTP surface.
//!
//! Configuration via environment:
//! - `TOPOMAP_BIND` / `TOPOMAP_PORT` — listen address (default 0.0.0.0:8080)
//! - `TOPOMAP_DATA_DIR` — snapshots and event logs (default ./topology_data)
//! - `TOPOMAP_FIXTURE` — JSON dump of cluster objects (required)
//! - `TOPOMAP_SNAPSHOT_INTERVAL` — seconds between snapshots (default 300)
//! - `TOPOMAP_MAX_SNAPSHOTS` — retention count (default 10)
//!
//! Build and run: `cargo run --features server --bin topomap-server`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use topomap::client::{ClusterApi, FixtureClient};
use topomap::events::EventLogger;
use topomap::http::AppContext;
use topomap::manager::{TopologyManager, run_snapshot_worker};
use topomap::watch::{ResourceWatcher, WatchConfig};

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let bind = env_or("TOPOMAP_BIND", "0.0.0.0");
    let port = env_or("TOPOMAP_PORT", "8080");
    let addr = format!("{bind}:{port}");
    let data_dir = PathBuf::from(env_or("TOPOMAP_DATA_DIR", "./topology_data"));
    let interval: u64 = env_or("TOPOMAP_SNAPSHOT_INTERVAL", "300")
        .parse()
        .unwrap_or(300);
    let max_snapshots: usize = env_or("TOPOMAP_MAX_SNAPSHOTS", "10").parse().unwrap_or(10);

    let Ok(fixture) = std::env::var("TOPOMAP_FIXTURE") else {
        tracing::error!("TOPOMAP_FIXTURE is not set");
        std::process::exit(1);
    };
    let client: Arc<dyn ClusterApi> = match FixtureClient::from_file(fixture.as_ref()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "failed to load cluster fixture");
            std::process::exit(1);
        }
    };

    let manager = Arc::new(TopologyManager::new(&data_dir));
    let events = match EventLogger::new(&data_dir) {
        Ok(events) => Arc::new(events),
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize event logger");
            std::process::exit(1);
        }
    };

    // Resume from the latest snapshot if one exists, else build fresh.
    let resumed = match manager.latest_snapshot() {
        Ok(Some(path)) => manager.load_snapshot(&path).is_ok(),
        _ => false,
    };
    if !resumed
        && let Err(e) = manager.refresh(client.as_ref()).await
    {
        tracing::error!(error = %e, "initial topology build failed");
        std::process::exit(1);
    }

    let mut watcher = ResourceWatcher::new(
        Arc::clone(&client),
        Arc::clone(&manager),
        Arc::clone(&events),
        WatchConfig::default(),
    );
    if let Err(e) = watcher.start().await {
        tracing::error!(error = %e, "failed to start resource watcher");
        std::process::exit(1);
    }

    let cancel = tokio_util::sync::CancellationToken::new();
    tokio::spawn(run_snapshot_worker(
        Arc::clone(&manager),
        Duration::from_secs(interval),
        max_snapshots,
        Duration::from_secs(3600),
        cancel.clone(),
    ));

    tracing::info!("topomap server initialized");

    let ctx = AppContext {
        client,
        manager,
        events,
    };
    let result = topomap::http::run(ctx, &addr).await;
    cancel.cancel();
    watcher.stop().await;
    if let Err(e) = result {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}
