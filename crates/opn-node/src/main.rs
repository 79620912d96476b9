//! Operator node CLI
//!
//! `run` starts a node against in-process collaborators described by the
//! `[local]` config section. `assign` prints which nodes the hash ring
//! assigns to each partition of a stream.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opn_node::{assign, local_environment, NodeConfig, OperatorNode};
use opn_protocol::{NodeId, StreamId};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "operator-node")]
#[command(about = "Coordination core of a stream network operator node", long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a node in local mode
    Run {
        /// Path to the TOML config (defaults to the user config directory)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the ring assignment of every partition of a stream
    Assign {
        /// Node ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        nodes: Vec<String>,

        #[arg(long)]
        stream: String,

        #[arg(long, default_value_t = 1)]
        partitions: u32,

        #[arg(long, default_value_t = 1)]
        redundancy: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Run { config } => run(config).await,
        Command::Assign { nodes, stream, partitions, redundancy } => {
            let nodes: Vec<NodeId> = nodes.iter().map(|n| NodeId::new(n.trim())).collect();
            let rows = assign::assignment_table(&nodes, &StreamId::new(stream), partitions, redundancy)?;
            print!("{}", assign::render(&rows));
            Ok(())
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = NodeConfig::load(config_path.as_deref())?;
    let env = local_environment(&config).await?;
    let node = OperatorNode::start(&config, env.collaborators.clone()).await?;
    tracing::info!(node_id = %node.node_id(), operator = %node.operator(), "Operator node running");

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    node.stop().await;
    Ok(())
}
