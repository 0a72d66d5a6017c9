//! topomap CLI: Kubernetes topology graph engine.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use topomap::analyze::subgraph::StartNode;
use topomap::analyze::{components, subgraph, taxonomy};
use topomap::snapshot::GraphDoc;

#[derive(Parser)]
#[command(name = "topomap", version, about = "Kubernetes topology graph engine")]
struct Cli {
    /// Directory for snapshots and event logs.
    #[arg(long, global = true, default_value = "./topology_data")]
    data_dir: PathBuf,

    /// Logging level (overridden by RUST_LOG when set).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split an exported topology into disconnected components.
    Analyze {
        /// Input graph document (snapshot JSON or GET /graph output).
        #[arg(long = "in")]
        input: PathBuf,

        /// Output JSON file; stdout when omitted.
        #[arg(long = "out")]
        output: Option<PathBuf>,
    },

    /// Extract the ancestor/descendant subgraph around one node.
    Subgraph {
        /// Input graph document.
        #[arg(long)]
        topology: PathBuf,

        /// Output JSON file; stdout when omitted.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Start node stable id.
        #[arg(long)]
        node_id: Option<String>,

        /// Start node kind, used with --name when no id is given.
        #[arg(long)]
        kind: Option<String>,

        /// Start node name.
        #[arg(long)]
        name: Option<String>,

        /// Start node namespace, narrows a kind/name lookup.
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Aggregate an exported topology into a kind-level taxonomy.
    Taxonomy {
        /// Input graph document.
        #[arg(long)]
        topology: PathBuf,

        /// Output JSON file for the structured summary.
        #[arg(long = "output-json")]
        output_json: PathBuf,

        /// Output DOT file for the kind diagram; stdout when omitted.
        #[arg(long = "output-dot")]
        output_dot: Option<PathBuf>,
    },

    /// Build the topology from a cluster fixture and serve it over HTTP.
    Serve {
        /// JSON dump of cluster objects to serve from.
        #[arg(long)]
        fixture: PathBuf,

        /// Snapshot interval in seconds.
        #[arg(long, default_value = "300")]
        interval: u64,

        /// Maximum number of snapshots to keep.
        #[arg(long, default_value = "10")]
        max_snapshots: usize,
    },
}

/// Read a graph document from a snapshot or a bare {nodes, edges} export.
fn load_doc(path: &PathBuf) -> Result<GraphDoc> {
    let text = std::fs::read_to_string(path).into_diagnostic()?;
    let doc: GraphDoc = serde_json::from_str(&text)
        .map_err(|e| topomap::error::AnalyzeError::MalformedDoc {
            message: format!("{}: {e}", path.display()),
        })?;
    Ok(doc)
}

fn write_or_print(output: Option<&PathBuf>, body: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, body).into_diagnostic()?;
            tracing::info!(path = %path.display(), "results written");
        }
        None => println!("{body}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Analyze { input, output } => {
            let doc = load_doc(&input)?;
            let result = components::analyze(&doc);
            let body = serde_json::to_string_pretty(&result).into_diagnostic()?;
            write_or_print(output.as_ref(), &body)?;
        }

        Commands::Subgraph {
            topology,
            output,
            node_id,
            kind,
            name,
            namespace,
        } => {
            let doc = load_doc(&topology)?;
            let start = match (node_id, kind, name) {
                (Some(id), _, _) => StartNode::Id(id),
                (None, Some(kind), Some(name)) => StartNode::Lookup {
                    kind,
                    name,
                    namespace,
                },
                _ => miette::bail!("pass either --node-id or both --kind and --name"),
            };
            let result = subgraph::extract(&doc, &start)?;
            let body = serde_json::to_string_pretty(&result).into_diagnostic()?;
            write_or_print(output.as_ref(), &body)?;
        }

        Commands::Taxonomy {
            topology,
            output_json,
            output_dot,
        } => {
            let doc = load_doc(&topology)?;
            let result = taxonomy::build(&doc);
            let body = serde_json::to_string_pretty(&result).into_diagnostic()?;
            std::fs::write(&output_json, body).into_diagnostic()?;
            tracing::info!(path = %output_json.display(), "taxonomy written");

            let dot = taxonomy::render_dot(&doc);
            write_or_print(output_dot.as_ref(), &dot)?;
        }

        Commands::Serve {
            fixture,
            interval,
            max_snapshots,
        } => {
            serve(cli.data_dir, fixture, interval, max_snapshots)?;
        }
    }

    Ok(())
}

#[cfg(feature = "server")]
fn serve(
    data_dir: PathBuf,
    fixture: PathBuf,
    interval: u64,
    max_snapshots: usize,
) -> Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use topomap::client::FixtureClient;
    use topomap::events::EventLogger;
    use topomap::http::AppContext;
    use topomap::manager::{TopologyManager, run_snapshot_worker};
    use topomap::watch::{ResourceWatcher, WatchConfig};

    let runtime = tokio::runtime::Runtime::new().into_diagnostic()?;
    runtime.block_on(async move {
        let client: Arc<dyn topomap::client::ClusterApi> =
            Arc::new(FixtureClient::from_file(&fixture)?);
        let manager = Arc::new(TopologyManager::new(&data_dir));
        let events = Arc::new(EventLogger::new(&data_dir)?);

        // Resume from the latest snapshot when one exists; otherwise do
        // the initial build.
        match manager.latest_snapshot()? {
            Some(path) => manager.load_snapshot(&path)?,
            None => manager.refresh(client.as_ref()).await?,
        }

        let mut watcher = ResourceWatcher::new(
            Arc::clone(&client),
            Arc::clone(&manager),
            Arc::clone(&events),
            WatchConfig::default(),
        );
        watcher.start().await?;

        let cancel = tokio_util::sync::CancellationToken::new();
        tokio::spawn(run_snapshot_worker(
            Arc::clone(&manager),
            Duration::from_secs(interval),
            max_snapshots,
            Duration::from_secs(3600),
            cancel.clone(),
        ));

        let ctx = AppContext {
            client,
            manager,
            events,
        };
        let result = topomap::http::run(ctx, "0.0.0.0:8080").await.into_diagnostic();
        cancel.cancel();
        watcher.stop().await;
        result
    })
}

#[cfg(not(feature = "server"))]
fn serve(_data_dir: PathBuf, _fixture: PathBuf, _interval: u64, _max_snapshots: usize) -> Result<()> {
    miette::bail!("built without the `server` feature; rebuild with --features server")
}
