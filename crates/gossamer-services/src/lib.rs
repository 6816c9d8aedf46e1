//! # Gossamer services
//!
//! Distributed algorithms built on the [`gossamer_node`] runtime:
//!
//! - [`echo`]: replies to `echo` with its payload.
//! - [`broadcast`]: flood gossip with per-node deduplication.
//! - [`replicated`]: G-Set, G-Counter and PN-Counter servers with push
//!   anti-entropy.
//! - [`txn`]: optimistic list-append transactions over a linearizable KV
//!   store, accessed through [`kv::LinKv`].
//!
//! Each service is installed onto a [`gossamer_node::Node`] before the node
//! starts reading input:
//!
//! ```rust,no_run
//! use gossamer_node::{Node, NodeConfig};
//! use gossamer_services::{CounterServer, ServiceConfig};
//!
//! # async fn run() -> gossamer_node::Result<()> {
//! let node = Node::stdio(NodeConfig::default());
//! CounterServer::install(&node, &ServiceConfig::default())?;
//! node.run_stdio().await
//! # }
//! ```

pub mod broadcast;
pub mod config;
pub mod echo;
pub mod kv;
pub mod replicated;
pub mod txn;

pub use broadcast::Broadcast;
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use kv::{KvResult, LinKv, MemoryKv};
pub use replicated::{CounterServer, CrdtServer, GCounterServer, GSetServer, Replicated};
pub use txn::Transactor;
