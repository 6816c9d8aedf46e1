//! In-memory cluster simulation.
//!
//! Each workload gets its own [`Network`]: a cluster of nodes, a driver
//! client and, for transactions, an in-memory `lin-kv`. Requests come from
//! seeded generators and run with bounded concurrency; afterwards every node
//! is polled until it agrees with the expected state or time runs out.

use anyhow::{bail, Result};
use async_stream::stream;
use clap::Args;
use colored::*;
use futures::stream::{Stream, StreamExt};
use gossamer_node::sim::{Client, Network};
use gossamer_node::{Body, ErrorCode, Message, Node, NodeConfig};
use gossamer_services::{Broadcast, CounterServer, MemoryKv, ServiceConfig, Transactor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Replication period used when simulating, unless overridden.
pub const REPLICATE_INTERVAL_MS: u64 = 100;

const TXN_KEYS: u64 = 4;

#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Nodes per cluster
    #[arg(long, default_value_t = 5)]
    pub nodes: usize,

    /// Requests per workload
    #[arg(long, default_value_t = 100)]
    pub ops: usize,

    /// Requests in flight at once
    #[arg(long, default_value_t = 8)]
    pub concurrency: usize,

    /// Workload seed; random if omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// How long to wait for the cluster to agree
    #[arg(long, default_value_t = 10_000)]
    pub settle_ms: u64,
}

/// Outcome of one workload.
struct Report {
    workload: &'static str,
    nodes: usize,
    ops: usize,
    elapsed: Duration,
    detail: String,
    converged: bool,
}

impl Report {
    fn print(&self) {
        let status = if self.converged {
            "✓ converged".bright_green().bold()
        } else {
            "✗ diverged".bright_red().bold()
        };
        println!(
            "  {:<10} nodes={:<3} ops={:<5} {:>8}s  {}  {}",
            self.workload.bright_magenta(),
            self.nodes,
            self.ops,
            format!("{:.3}", self.elapsed.as_secs_f64()),
            status,
            self.detail.dimmed()
        );
    }
}

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

// ─── Entry point ──────────────────────────────────────────────────────────

pub async fn run(args: &SimulateArgs, node_config: &NodeConfig, services: &ServiceConfig) -> Result<()> {
    if args.nodes == 0 || args.concurrency == 0 {
        bail!("--nodes and --concurrency must be positive");
    }
    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!(seed, nodes = args.nodes, ops = args.ops, "starting simulation");
    header(&format!("Gossamer simulation (seed {seed})"));

    let reports = vec![
        simulate_broadcast(args, seed, node_config).await?,
        simulate_counter(args, seed, node_config, services).await?,
        simulate_txn(args, seed, node_config, services).await?,
    ];

    header("Results");
    for report in &reports {
        report.print();
    }
    if reports.iter().any(|r| !r.converged) {
        bail!("cluster did not converge");
    }
    Ok(())
}

// ─── Workload generators ──────────────────────────────────────────────────

/// `(node, value)` pairs; values are distinct.
fn broadcast_workload(seed: u64, nodes: usize, ops: usize) -> impl Stream<Item = (usize, u64)> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for value in 0..ops as u64 {
            yield (rng.gen_range(0..nodes), value);
        }
    }
}

/// `(node, delta)` pairs, biased towards increments.
fn counter_workload(seed: u64, nodes: usize, ops: usize) -> impl Stream<Item = (usize, i64)> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
        for _ in 0..ops {
            yield (rng.gen_range(0..nodes), rng.gen_range(-5..=10));
        }
    }
}

/// `(node, txn)` pairs; every appended value is distinct.
fn txn_workload(seed: u64, nodes: usize, ops: usize) -> impl Stream<Item = (usize, Value)> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed ^ 0x7a7a);
        let mut next_value = 0u64;
        for _ in 0..ops {
            let len = rng.gen_range(1..=3);
            let mut txn = Vec::with_capacity(len);
            for _ in 0..len {
                let key = rng.gen_range(0..TXN_KEYS);
                if rng.gen_bool(0.5) {
                    txn.push(json!(["r", key, null]));
                } else {
                    txn.push(json!(["append", key, next_value]));
                    next_value += 1;
                }
            }
            yield (rng.gen_range(0..nodes), Value::Array(txn));
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────────────

/// Adds `args.nodes` nodes set up by `install`, then runs the handshake.
async fn cluster<F>(network: &Network, args: &SimulateArgs, config: &NodeConfig, install: F) -> Result<Client>
where
    F: Fn(&Node) -> gossamer_node::Result<()>,
{
    for i in 0..args.nodes {
        let node = network.node(config.clone());
        install(&node)?;
        network.add_node(format!("n{i}"), node);
    }
    let client = network.client("c0");
    network.init(&client).await?;
    step(&format!("{} nodes initialized", args.nodes));
    Ok(client)
}

/// A random spanning tree over `ids`, as a symmetric neighbor map.
fn random_tree(ids: &[String], seed: u64) -> BTreeMap<String, Vec<String>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut topology: BTreeMap<String, Vec<String>> =
        ids.iter().map(|id| (id.clone(), Vec::new())).collect();
    for (i, id) in ids.iter().enumerate().skip(1) {
        let parent = &ids[rng.gen_range(0..i)];
        topology.entry(id.clone()).or_default().push(parent.clone());
        topology.entry(parent.clone()).or_default().push(id.clone());
    }
    topology
}

fn ok_body(reply: Message, expected: &str) -> Result<Body> {
    if let Some(err) = reply.body.error() {
        bail!("{} from {}: {}", err.code, reply.src, err.text);
    }
    if reply.kind() != expected {
        bail!("expected {expected} from {}, got {}", reply.src, reply.kind());
    }
    Ok(reply.body)
}

async fn read_field(client: &Client, node: &str, field: &str) -> Result<Value> {
    let body = ok_body(client.call(node, Body::new("read")).await?, "read_ok")?;
    Ok(body.get(field).cloned().unwrap_or_default())
}

/// Polls `check` until it holds or `limit` elapses.
async fn settle<F, Fut>(limit: Duration, mut check: F) -> Result<bool>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    loop {
        if check().await? {
            return Ok(true);
        }
        if start.elapsed() > limit {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn all_nodes_read(client: &Client, ids: &[String], field: &str, expected: &Value) -> Result<bool> {
    for id in ids {
        if read_field(client, id, field).await? != *expected {
            return Ok(false);
        }
    }
    Ok(true)
}

// ─── Workloads ────────────────────────────────────────────────────────────

async fn simulate_broadcast(args: &SimulateArgs, seed: u64, config: &NodeConfig) -> Result<Report> {
    section("Broadcast");
    let network = Network::new();
    let client = cluster(&network, args, config, |node| Broadcast::install(node).map(drop)).await?;
    let ids = network.node_ids();

    let topology = random_tree(&ids, seed);
    for id in &ids {
        let body = Body::new("topology").with("topology", json!(topology));
        ok_body(client.call(id, body).await?, "topology_ok")?;
    }
    step("spanning-tree topology installed");

    let start = Instant::now();
    let replies: Vec<_> = broadcast_workload(seed, ids.len(), args.ops)
        .map(|(node, value)| client.call(&ids[node], Body::new("broadcast").with("message", value)))
        .buffer_unordered(args.concurrency)
        .collect()
        .await;
    for reply in replies {
        ok_body(reply?, "broadcast_ok")?;
    }
    step(&format!("{} values broadcast", args.ops));

    let expected = json!((0..args.ops as u64).collect::<Vec<_>>());
    let limit = Duration::from_millis(args.settle_ms);
    let converged = settle(limit, || all_nodes_read(&client, &ids, "messages", &expected)).await?;

    Ok(Report {
        workload: "broadcast",
        nodes: ids.len(),
        ops: args.ops,
        elapsed: start.elapsed(),
        detail: format!("{} values on every node", args.ops),
        converged,
    })
}

async fn simulate_counter(
    args: &SimulateArgs,
    seed: u64,
    config: &NodeConfig,
    services: &ServiceConfig,
) -> Result<Report> {
    section("PN-Counter");
    let network = Network::new();
    let client = cluster(&network, args, config, |node| {
        CounterServer::install(node, services).map(drop)
    })
    .await?;
    let ids = network.node_ids();

    let start = Instant::now();
    let deltas: Vec<(usize, i64)> = counter_workload(seed, ids.len(), args.ops).collect().await;
    let expected: i64 = deltas.iter().map(|(_, delta)| delta).sum();
    let replies: Vec<_> = futures::stream::iter(deltas)
        .map(|(node, delta)| client.call(&ids[node], Body::new("add").with("delta", delta)))
        .buffer_unordered(args.concurrency)
        .collect()
        .await;
    for reply in replies {
        ok_body(reply?, "add_ok")?;
    }
    step(&format!("{} adds applied, expecting {expected}", args.ops));

    let expected = json!(expected);
    let limit = Duration::from_millis(args.settle_ms);
    let converged = settle(limit, || all_nodes_read(&client, &ids, "value", &expected)).await?;

    Ok(Report {
        workload: "counter",
        nodes: ids.len(),
        ops: args.ops,
        elapsed: start.elapsed(),
        detail: format!("value {expected}"),
        converged,
    })
}

#[derive(Default)]
struct TxnTally {
    committed: usize,
    conflicts: usize,
    failed: usize,
    appended: BTreeMap<u64, BTreeSet<u64>>,
}

async fn simulate_txn(
    args: &SimulateArgs,
    seed: u64,
    config: &NodeConfig,
    services: &ServiceConfig,
) -> Result<Report> {
    section("Transactions");
    let network = Network::new();
    network.add_service(services.kv_service.clone(), Arc::new(MemoryKv::new()));
    let client = cluster(&network, args, config, |node| {
        Transactor::install(node, services).map(drop)
    })
    .await?;
    let ids = network.node_ids();

    let start = Instant::now();
    let tally = Mutex::new(TxnTally::default());
    txn_workload(seed, ids.len(), args.ops)
        .for_each_concurrent(args.concurrency, |(node, txn)| {
            let (client, ids, tally) = (&client, &ids, &tally);
            async move {
                let outcome = client
                    .call(&ids[node], Body::new("txn").with("txn", txn.clone()))
                    .await;
                let mut tally = tally.lock().await;
                match outcome.map(|reply| reply.body) {
                    Ok(body) if body.kind == "txn_ok" => {
                        tally.committed += 1;
                        for op in txn.as_array().into_iter().flatten() {
                            if op[0] == "append" {
                                if let (Some(k), Some(v)) = (op[1].as_u64(), op[2].as_u64()) {
                                    tally.appended.entry(k).or_default().insert(v);
                                }
                            }
                        }
                    }
                    Ok(body) if body.error().is_some_and(|e| e.code == ErrorCode::TxnConflict) => {
                        tally.conflicts += 1;
                    }
                    Ok(body) => {
                        debug!(?body, "transaction failed");
                        tally.failed += 1;
                    }
                    Err(err) => {
                        debug!(error = %err, "transaction lost");
                        tally.failed += 1;
                    }
                }
            }
        })
        .await;
    let tally = tally.into_inner();
    step(&format!(
        "{} committed, {} conflicts, {} failed",
        tally.committed, tally.conflicts, tally.failed
    ));

    // Every committed append, and nothing else, is visible from every node.
    let reads: Vec<Value> = (0..TXN_KEYS).map(|k| json!(["r", k, null])).collect();
    let mut converged = true;
    for id in &ids {
        let reply = client
            .call(id, Body::new("txn").with("txn", Value::Array(reads.clone())))
            .await?;
        let body = ok_body(reply, "txn_ok")?;
        for op in body.get("txn").and_then(Value::as_array).into_iter().flatten() {
            let key = op[1].as_u64().unwrap_or_default();
            let seen: BTreeSet<u64> = op[2]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_u64)
                .collect();
            let expected = tally.appended.get(&key).cloned().unwrap_or_default();
            if seen != expected {
                debug!(node = %id, key, ?seen, ?expected, "lists differ");
                converged = false;
            }
        }
    }

    Ok(Report {
        workload: "txn",
        nodes: ids.len(),
        ops: args.ops,
        elapsed: start.elapsed(),
        detail: format!("{} committed, {} conflicts", tally.committed, tally.conflicts),
        converged,
    })
}
