//! Rich diagnostic error types for the topomap engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so operators know exactly
//! what went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the topomap engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, sources) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum TopoError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Watch(#[from] WatchError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    EventLog(#[from] EventLogError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Analyze(#[from] AnalyzeError),
}

// ---------------------------------------------------------------------------
// Cluster client errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ClientError {
    /// The watch resource version is no longer served by the API.
    ///
    /// This is an expected condition: the watcher must silently restart
    /// from a fresh list. It is kept distinct from transient errors so the
    /// watch loop can tell the two apart.
    #[error("resource version expired for {kind}")]
    #[diagnostic(
        code(topo::client::version_expired),
        help(
            "The cluster has compacted its change history past the resumption \
             point. Re-list the resource to obtain a fresh resourceVersion and \
             reopen the watch from there."
        )
    )]
    VersionExpired { kind: String },

    #[error("cluster API error during {operation} on {kind}: {message}")]
    #[diagnostic(
        code(topo::client::api),
        help(
            "The cluster API rejected or failed the request. Check connectivity, \
             credentials, and whether this resource kind still exists."
        )
    )]
    Api {
        operation: String,
        kind: String,
        message: String,
    },

    #[error("fixture error: {message}")]
    #[diagnostic(
        code(topo::client::fixture),
        help(
            "The fixture file could not be read or parsed. It must be a JSON \
             array of cluster objects, each with apiVersion, kind, and metadata."
        )
    )]
    Fixture { message: String },
}

// ---------------------------------------------------------------------------
// Collector errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CollectError {
    #[error("kind discovery failed: {message}")]
    #[diagnostic(
        code(topo::collect::discovery),
        help(
            "The collector could not enumerate API resource kinds at all. \
             Per-kind listing failures are tolerated, but without discovery \
             there is nothing to collect."
        )
    )]
    Discovery { message: String },
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    // Field names avoid `source`, which thiserror reserves for error chaining.
    #[error("edge endpoint missing: {endpoint} (for edge {from} -> {to})")]
    #[diagnostic(
        code(topo::graph::dangling_edge),
        help(
            "An edge referenced a node that is not part of the live graph. \
             The live graph never stores dangling edges; this indicates a bug \
             in the caller."
        )
    )]
    DanglingEdge {
        from: String,
        to: String,
        endpoint: String,
    },
}

// ---------------------------------------------------------------------------
// Snapshot errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    #[error("snapshot file not found: {path}")]
    #[diagnostic(
        code(topo::snapshot::not_found),
        help(
            "The snapshot path does not exist. List the data directory for \
             available topology_snapshot_<unixtime>.json files."
        )
    )]
    NotFound { path: String },

    #[error("I/O error on snapshot {path}: {source}")]
    #[diagnostic(
        code(topo::snapshot::io),
        help(
            "A filesystem operation failed. Check that the data directory \
             exists, has correct permissions, and that the disk is not full."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed snapshot document {path}: {source}")]
    #[diagnostic(
        code(topo::snapshot::malformed),
        help(
            "The snapshot is not a well-formed topology document. Snapshots \
             are immutable and assumed well-formed; no partial recovery is \
             attempted. Load a different snapshot or run a fresh refresh."
        )
    )]
    Malformed {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Watcher errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum WatchError {
    #[error("event queue closed while publishing a {kind} event")]
    #[diagnostic(
        code(topo::watch::queue_closed),
        help(
            "The consumer side of the event queue has gone away. This only \
             happens after shutdown; watch loops should exit on cancellation \
             before they see it."
        )
    )]
    QueueClosed { kind: String },

    #[error("watcher already running")]
    #[diagnostic(
        code(topo::watch::already_running),
        help("Call stop() and await completion before starting the watcher again.")
    )]
    AlreadyRunning,
}

// ---------------------------------------------------------------------------
// Event log errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EventLogError {
    #[error("I/O error on event log {path}: {source}")]
    #[diagnostic(
        code(topo::events::io),
        help(
            "Writing or pruning the per-day event log failed. Check the data \
             directory permissions and free disk space."
        )
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Analyzer errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum AnalyzeError {
    #[error("start node not found: {wanted}")]
    #[diagnostic(
        code(topo::analyze::start_not_found),
        help(
            "The subgraph start node is not present in the exported graph \
             document. Pass a stable id from the document's node list, or a \
             (kind, name, namespace) triple that matches exactly one node."
        )
    )]
    StartNodeNotFound { wanted: String },

    #[error("ambiguous start node: {wanted} matches {count} nodes")]
    #[diagnostic(
        code(topo::analyze::ambiguous_start),
        help("Narrow the lookup with --namespace, or address the node by stable id.")
    )]
    AmbiguousStartNode { wanted: String, count: usize },

    #[error("malformed graph document: {message}")]
    #[diagnostic(
        code(topo::analyze::malformed_doc),
        help(
            "The input is not a topology graph document. Expected JSON with \
             top-level `nodes` and `edges` arrays, as produced by saveSnapshot \
             or GET /graph."
        )
    )]
    MalformedDoc { message: String },
}

/// Convenience alias for functions returning topomap results.
pub type TopoResult<T> = std::result::Result<T, TopoError>;
