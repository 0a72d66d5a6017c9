// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # topomap
//!
//! A live topology graph engine for Kubernetes clusters: it discovers and
//! lists every collectable resource kind, derives a directed relationship
//! graph (ownership, runtime placement, networking, storage, mounts), keeps
//! the graph current through watch streams, and persists point-in-time
//! snapshots that an offline analysis toolkit consumes.
//!
//! ## Architecture
//!
//! - **Cluster capability** (`client`): the list/discover/watch trait plus
//!   a JSON-fixture implementation
//! - **Collector** (`collect`): enumerate kinds and normalize objects,
//!   partial-failure tolerant
//! - **Graph** (`graph`): petgraph-backed directed graph with stable-id
//!   indexing; the builder derives all edges in one deterministic pass
//! - **Manager** (`manager`): the single writer — atomic refresh,
//!   incremental mutation, snapshot persistence, stale-node eviction
//! - **Watcher** (`watch`): per-kind watch sessions, bounded event queue,
//!   debounced refresh
//! - **Events** (`events`): per-day append-only audit log
//! - **Analysis** (`analyze`): components, subgraph extraction, and the
//!   kind-level taxonomy over exported documents
//!
//! ## Library usage
//!
//! ```no_run
//! use topomap::client::FixtureClient;
//! use topomap::manager::TopologyManager;
//!
//! # async fn demo() -> miette::Result<()> {
//! let client = FixtureClient::from_file(std::path::Path::new("cluster.json"))?;
//! let manager = TopologyManager::new("./topology_data");
//! manager.refresh(&client).await?;
//! let path = manager.save_snapshot()?;
//! println!("snapshot written to {}", path.display());
//! # Ok(())
//! # }
//! ```

pub mod analyze;
pub mod client;
pub mod collect;
pub mod error;
pub mod events;
pub mod graph;
#[cfg(feature = "server")]
pub mod http;
pub mod manager;
pub mod resource;
pub mod snapshot;
pub mod watch;
