//! # Gossamer
//!
//! Runs one node kind over stdin/stdout for a line-delimited JSON harness,
//! or a whole in-memory cluster with `simulate`.
//!
//! Logs go to stderr; stdout carries protocol messages only. Set `RUST_LOG`
//! to adjust verbosity (default `info`).

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use gossamer_node::{Node, NodeConfig, NodeConfigBuilder};
use gossamer_services::{
    echo, Broadcast, CounterServer, GCounterServer, GSetServer, ServiceConfig,
    ServiceConfigBuilder, Transactor,
};
use simulate::SimulateArgs;
use tracing::info;

mod simulate;

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "gossamer")]
#[command(about = "Distributed-systems workloads for a line-delimited JSON harness")]
#[command(version)]
struct Cli {
    /// How long a synchronous RPC waits for its reply
    #[arg(long, default_value_t = 5000)]
    rpc_timeout_ms: u64,

    /// Anti-entropy period for the replicated servers [default: 5000, or
    /// 100 for simulate]
    #[arg(long)]
    replicate_interval_ms: Option<u64>,

    /// Name of the linearizable key-value service
    #[arg(long, default_value = "lin-kv")]
    kv_service: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Echo server
    Echo,
    /// Flood gossip broadcast
    Broadcast,
    /// Grow-only set with anti-entropy
    GSet,
    /// PN-Counter with anti-entropy
    Counter,
    /// Grow-only counter with anti-entropy
    GCounter,
    /// Optimistic list-append transactions over lin-kv
    Txn,
    /// Run broadcast, counter and txn workloads against an in-memory cluster
    Simulate(SimulateArgs),
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let node_config = NodeConfigBuilder::new()
        .rpc_timeout(cli.rpc_timeout_ms)
        .build();
    let default_interval = match cli.command {
        Commands::Simulate(_) => simulate::REPLICATE_INTERVAL_MS,
        _ => ServiceConfig::default().replicate_interval_ms,
    };
    let service_config = ServiceConfigBuilder::new()
        .replicate_interval(cli.replicate_interval_ms.unwrap_or(default_interval))
        .kv_service(cli.kv_service)
        .build();

    match cli.command {
        Commands::Simulate(args) => simulate::run(&args, &node_config, &service_config).await,
        command => serve(command, node_config, &service_config).await,
    }
}

/// Installs one node kind and runs it on stdin/stdout until input closes.
async fn serve(command: Commands, node_config: NodeConfig, services: &ServiceConfig) -> Result<()> {
    let node = Node::stdio(node_config);
    let kind = match command {
        Commands::Echo => {
            echo::install(&node)?;
            "echo"
        }
        Commands::Broadcast => {
            Broadcast::install(&node)?;
            "broadcast"
        }
        Commands::GSet => {
            GSetServer::install(&node, services)?;
            "g-set"
        }
        Commands::Counter => {
            CounterServer::install(&node, services)?;
            "counter"
        }
        Commands::GCounter => {
            GCounterServer::install(&node, services)?;
            "g-counter"
        }
        Commands::Txn => {
            Transactor::install(&node, services)?;
            "txn"
        }
        Commands::Simulate(_) => bail!("simulate does not run over stdio"),
    };

    info!(kind, "node starting");
    node.run_stdio().await?;
    Ok(())
}
