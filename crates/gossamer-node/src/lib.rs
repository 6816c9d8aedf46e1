//! Node runtime for gossamer.
//!
//! Each gossamer process is a node in a Maelstrom-style cluster: it reads
//! line-delimited JSON messages, routes them to handlers, and writes replies
//! and requests of its own. This crate provides everything the algorithms
//! share:
//!
//! - [`message`] - the `{src, dest, body}` envelope and line framing
//! - [`node`] - handler registry, RPC correlation, periodic tasks
//! - [`transport`] - stdout and in-memory transports
//! - [`sim`] - an in-memory network for tests and local simulation
//! - [`config`] - runtime configuration
//! - [`error`] - protocol error codes and runtime errors
//!
//! # Example
//!
//! ```rust,no_run
//! use gossamer_node::{Body, Node, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> gossamer_node::Result<()> {
//!     let node = Node::stdio(NodeConfig::default());
//!     node.on("echo", |node, msg| async move {
//!         let echo = msg.body.get("echo").cloned().unwrap_or_default();
//!         node.reply(&msg, Body::new("echo_ok").with("echo", echo)).await?;
//!         Ok(())
//!     })?;
//!     node.run_stdio().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod node;
pub mod sim;
pub mod transport;

pub use config::{NodeConfig, NodeConfigBuilder};
pub use error::{ErrorCode, NodeError, Result, RpcError};
pub use message::{Body, Message};
pub use node::{HandlerResult, Identity, Node};
pub use transport::{LineTransport, MemoryTransport, Transport};
