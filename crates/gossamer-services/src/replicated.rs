//! Replicated CRDT servers.
//!
//! A server holds one CRDT value behind one lock. Clients mutate it with
//! `add` and observe it with `read`; replicas converge through push-only
//! anti-entropy: every `replicate_interval` each node sends its whole state
//! to every other member, and receivers join it into their own. Joins are
//! commutative and idempotent, so lost, duplicated or reordered pushes are
//! repaired by the next round.

use crate::config::ServiceConfig;
use gossamer_crdt::{Datum, GCounter, GSet, Lattice, PNCounter};
use gossamer_node::{Body, HandlerResult, Message, Node, NodeError, Result, RpcError};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A CRDT a [`CrdtServer`] can host.
pub trait Replicated: Lattice + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Payload of an `add` request.
    type Update: DeserializeOwned + Send;
    /// What `read` reports.
    type Value: Serialize + Send;

    /// Returns the value with `update` applied on behalf of `node_id`.
    fn apply(&self, node_id: &str, update: Self::Update) -> std::result::Result<Self, RpcError>;

    fn value(&self) -> Self::Value;
}

#[derive(Deserialize)]
pub struct AddElement {
    pub element: Datum,
}

#[derive(Deserialize)]
pub struct AddDelta {
    pub delta: i64,
}

impl Replicated for GSet<Datum> {
    type Update = AddElement;
    type Value = Vec<Datum>;

    fn apply(&self, _node_id: &str, update: AddElement) -> std::result::Result<Self, RpcError> {
        Ok(self.add(update.element))
    }

    fn value(&self) -> Vec<Datum> {
        self.read()
    }
}

impl Replicated for PNCounter<String> {
    type Update = AddDelta;
    type Value = i64;

    fn apply(&self, node_id: &str, update: AddDelta) -> std::result::Result<Self, RpcError> {
        Ok(self.add(node_id.to_string(), update.delta))
    }

    fn value(&self) -> i64 {
        self.read()
    }
}

impl Replicated for GCounter<String> {
    type Update = AddDelta;
    type Value = u64;

    fn apply(&self, node_id: &str, update: AddDelta) -> std::result::Result<Self, RpcError> {
        let delta = u64::try_from(update.delta).map_err(|_| {
            RpcError::malformed_request(format!(
                "grow-only counter cannot add {}",
                update.delta
            ))
        })?;
        Ok(self.add(node_id.to_string(), delta))
    }

    fn value(&self) -> u64 {
        self.read()
    }
}

#[derive(Deserialize)]
struct ReplicateRequest<C> {
    value: C,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CrdtReply<V> {
    AddOk,
    ReadOk { value: V },
}

/// Grow-only set server.
pub type GSetServer = CrdtServer<GSet<Datum>>;
/// PN-Counter server.
pub type CounterServer = CrdtServer<PNCounter<String>>;
/// Grow-only counter server; rejects negative deltas.
pub type GCounterServer = CrdtServer<GCounter<String>>;

/// A node-local CRDT replica with push anti-entropy.
pub struct CrdtServer<C: Replicated> {
    crdt: Mutex<C>,
}

impl<C: Replicated> CrdtServer<C> {
    /// Registers `add`, `read` and `replicate` on `node` and schedules the
    /// periodic push.
    pub fn install(node: &Node, config: &ServiceConfig) -> Result<Arc<Self>> {
        let server = Arc::new(Self {
            crdt: Mutex::new(C::bottom()),
        });

        let this = Arc::clone(&server);
        node.on("add", move |node, msg| {
            let this = Arc::clone(&this);
            async move { this.handle_add(node, msg).await }
        })?;

        let this = Arc::clone(&server);
        node.on("read", move |node, msg| {
            let this = Arc::clone(&this);
            async move { this.handle_read(node, msg).await }
        })?;

        let this = Arc::clone(&server);
        node.on("replicate", move |_node, msg| {
            let this = Arc::clone(&this);
            async move { this.handle_replicate(msg) }
        })?;

        let this = Arc::clone(&server);
        node.every(config.replicate_interval(), move |node| {
            let this = Arc::clone(&this);
            async move { this.replicate(&node).await }
        });

        Ok(server)
    }

    /// A copy of the current value.
    pub fn snapshot(&self) -> C {
        self.crdt.lock().clone()
    }

    /// Pushes the current state to every other cluster member once.
    pub async fn replicate(&self, node: &Node) -> HandlerResult {
        let identity = node.identity().ok_or(NodeError::NotInitialized)?;
        let value = serde_json::to_value(self.snapshot())
            .map_err(|e| RpcError::crash(format!("cannot serialize state: {e}")))?;
        debug!(%value, "replicating current value");

        for peer in identity.peers() {
            let body = Body::new("replicate").with("value", value.clone());
            if let Err(err) = node.send(peer, body).await {
                warn!(%peer, error = %err, "failed to replicate");
            }
        }
        Ok(())
    }

    async fn handle_add(&self, node: Node, msg: Message) -> HandlerResult {
        let update: C::Update = msg.body.parse()?;
        {
            let mut crdt = self.crdt.lock();
            let next = crdt.apply(node.node_id()?, update)?;
            *crdt = next;
        }
        let reply = Body::from_payload(&CrdtReply::<Value>::AddOk)?;
        node.reply(&msg, reply).await?;
        Ok(())
    }

    async fn handle_read(&self, node: Node, msg: Message) -> HandlerResult {
        let value = self.crdt.lock().value();
        let reply = Body::from_payload(&CrdtReply::ReadOk { value })?;
        node.reply(&msg, reply).await?;
        Ok(())
    }

    fn handle_replicate(&self, msg: Message) -> HandlerResult {
        let req: ReplicateRequest<C> = msg.body.parse()?;
        let mut crdt = self.crdt.lock();
        let merged = crdt.join(&req.value);
        *crdt = merged;
        Ok(())
    }
}
