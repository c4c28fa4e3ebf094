//! BrainGrid node
//!
//! Runs one or more cluster nodes over a local coordination ensemble, each
//! with telemetry, log retention and the CLI mailbox server attached.

mod config;
mod error;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use braingrid_coord::{Ensemble, EnsembleConfig};
use braingrid_leader::{ClusterNode, LeaderResult};
use braingrid_services::{
    CliServer, CommandRegistry, LogRetentionManager, MemoryLogStore, SysinfoSource,
    TelemetryManager,
};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::NodeFileConfig;
use crate::error::{NodeError, Result};

/// BrainGrid cluster node
#[derive(Parser)]
#[command(name = "braingrid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "braingrid.toml")]
    config: PathBuf,

    /// Log level, overrides the config file (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log format, overrides the config file (text, json)
    #[arg(long)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the configured nodes and run until Ctrl-C
    Start {
        /// Number of local nodes, overrides node.local_nodes
        #[arg(short, long)]
        nodes: Option<usize>,
    },

    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "braingrid.toml")]
        output: PathBuf,

        /// Node host name
        #[arg(long)]
        hostname: Option<String>,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { nodes } => {
            let mut config = load_config(&cli.config)?;
            if let Some(n) = nodes {
                config.node.local_nodes = n;
                config.validate()?;
            }
            init_logging(
                cli.log_level.as_deref().unwrap_or(&config.logging.level),
                cli.log_format.as_deref().unwrap_or(&config.logging.format),
            );
            run_start(config).await?;
        }
        Commands::Init { output, hostname } => {
            init_logging(
                cli.log_level.as_deref().unwrap_or("info"),
                cli.log_format.as_deref().unwrap_or("text"),
            );
            run_init(&output, hostname)?;
        }
        Commands::Validate => {
            init_logging(
                cli.log_level.as_deref().unwrap_or("info"),
                cli.log_format.as_deref().unwrap_or("text"),
            );
            run_validate(&cli.config)?;
        }
    }

    Ok(())
}

/// Initialize logging. `RUST_LOG` wins over `level`.
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Missing default config file means built-in defaults.
fn load_config(path: &Path) -> Result<NodeFileConfig> {
    if path.exists() {
        NodeFileConfig::from_file(path)
    } else {
        let config = NodeFileConfig::default();
        config.validate()?;
        Ok(config)
    }
}

async fn run_start(config: NodeFileConfig) -> Result<()> {
    let names = config.node_names();
    tracing::info!(
        "Starting {} node(s) under /{}: {}",
        names.len(),
        config.cluster.root,
        names.join(", ")
    );

    let ensemble = Ensemble::new(EnsembleConfig::default());
    let log_store = Arc::new(MemoryLogStore::new());
    let (stop_tx, stop_rx) = watch::channel(false);

    let mut tasks: JoinSet<(String, LeaderResult<()>)> = JoinSet::new();
    for name in &names {
        let mut node = ClusterNode::new(Arc::new(ensemble.connect()), config.leader_config(name))?;
        let handle = node.handle();

        node.register(Arc::new(TelemetryManager::new(
            &handle,
            Arc::new(SysinfoSource::new()),
            config.telemetry_config(),
        )));
        node.register(Arc::new(LogRetentionManager::new(
            log_store.clone(),
            config.retention_config(),
        )));
        node.register(Arc::new(CliServer::new(
            Arc::clone(handle.client()),
            handle.paths().clone(),
            CommandRegistry::with_builtins(handle.clone()),
            config.cli_config(),
        )));

        let name = name.clone();
        let stop_rx = stop_rx.clone();
        tasks.spawn(async move { (name, node.run(stop_rx).await) });
    }

    supervise(tasks, stop_tx, tokio::signal::ctrl_c()).await
}

/// Waits for `signal` or for the first node to stop on its own, whichever
/// comes first, then stops and joins every node.
///
/// A node that stops without being asked counts as failed.
async fn supervise<S>(
    mut tasks: JoinSet<(String, LeaderResult<()>)>,
    stop_tx: watch::Sender<bool>,
    signal: S,
) -> Result<()>
where
    S: Future<Output = std::io::Result<()>>,
{
    let total = tasks.len();
    let mut failed = 0;

    tokio::select! {
        received = signal => {
            received?;
            tracing::info!("Received shutdown signal");
        }
        Some(joined) = tasks.join_next() => {
            record_outcome(joined);
            tracing::error!("A node stopped unexpectedly, shutting down the others");
            failed += 1;
        }
    }
    let _ = stop_tx.send(true);

    while let Some(joined) = tasks.join_next().await {
        if !record_outcome(joined) {
            failed += 1;
        }
    }

    tracing::info!("BrainGrid shutdown complete");
    if failed > 0 {
        return Err(NodeError::NodesFailed { failed, total });
    }
    Ok(())
}

/// Logs a finished node task. Returns `false` if it ended with an error.
fn record_outcome(joined: std::result::Result<(String, LeaderResult<()>), JoinError>) -> bool {
    match joined {
        Ok((name, Ok(()))) => {
            tracing::info!(node = %name, "Node stopped");
            true
        }
        Ok((name, Err(e))) => {
            tracing::error!(node = %name, "Node stopped with error: {}", e);
            false
        }
        Err(e) => {
            tracing::error!("Node task failed: {}", e);
            false
        }
    }
}

fn run_init(output: &Path, hostname: Option<String>) -> Result<()> {
    if output.exists() {
        return Err(NodeError::Config(format!(
            "{} already exists",
            output.display()
        )));
    }

    let mut config = NodeFileConfig::default();
    if let Some(hostname) = hostname {
        config.node.hostname = hostname;
    }
    config.validate()?;

    let content = format!(
        "# BrainGrid node configuration\n# Generated configuration file\n\n{}",
        config.to_toml()?
    );
    std::fs::write(output, content)?;

    tracing::info!("Configuration written to {}", output.display());
    Ok(())
}

fn run_validate(path: &Path) -> Result<()> {
    let config = NodeFileConfig::from_file(path)?;

    println!("Configuration is valid: {}", path.display());
    println!("  Nodes: {}", config.node_names().join(", "));
    println!("  Cluster root: /{}", config.cluster.root.trim_matches('/'));
    println!(
        "  Watchdog interval: {}ms, transition interval: {}ms",
        config.cluster.watchdog_interval_ms, config.cluster.transition_interval_ms
    );
    Ok(())
}
