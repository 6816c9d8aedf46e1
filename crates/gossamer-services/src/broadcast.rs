//! Gossip broadcast.
//!
//! Every node keeps the set of values it has seen. The first time a value
//! shows up, the node records it and floods it to each of its neighbors;
//! later sightings are dropped. Because a node forwards each value at most
//! once, flooding terminates without TTLs or path tracking, and on a
//! connected topology every node ends up holding every value.
//!
//! Client requests carry a `msg_id` and get a `broadcast_ok`. Gossip between
//! nodes is sent without one and is never acknowledged.

use gossamer_crdt::Datum;
use gossamer_node::{Body, HandlerResult, Message, Node, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Deserialize)]
struct TopologyRequest {
    topology: HashMap<String, Vec<String>>,
}

#[derive(Deserialize)]
struct BroadcastRequest {
    message: Datum,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BroadcastReply {
    TopologyOk,
    BroadcastOk,
    ReadOk { messages: Vec<Datum> },
}

#[derive(Default)]
struct BroadcastState {
    neighbors: Vec<String>,
    messages: BTreeSet<Datum>,
}

/// The broadcast service's local state.
#[derive(Default)]
pub struct Broadcast {
    state: Mutex<BroadcastState>,
}

impl Broadcast {
    /// Registers `topology`, `read` and `broadcast` on `node`.
    pub fn install(node: &Node) -> Result<Arc<Self>> {
        let service = Arc::new(Self::default());

        let this = Arc::clone(&service);
        node.on("topology", move |node, msg| {
            let this = Arc::clone(&this);
            async move { this.handle_topology(node, msg).await }
        })?;

        let this = Arc::clone(&service);
        node.on("read", move |node, msg| {
            let this = Arc::clone(&this);
            async move { this.handle_read(node, msg).await }
        })?;

        let this = Arc::clone(&service);
        node.on("broadcast", move |node, msg| {
            let this = Arc::clone(&this);
            async move { this.handle_broadcast(node, msg).await }
        })?;

        Ok(service)
    }

    /// Current neighbor list.
    pub fn neighbors(&self) -> Vec<String> {
        self.state.lock().neighbors.clone()
    }

    /// Every value seen so far, in order.
    pub fn messages(&self) -> Vec<Datum> {
        self.state.lock().messages.iter().cloned().collect()
    }

    async fn handle_topology(&self, node: Node, msg: Message) -> HandlerResult {
        let mut req: TopologyRequest = msg.body.parse()?;
        let neighbors = req.topology.remove(node.node_id()?).unwrap_or_default();
        info!(?neighbors, "topology updated");
        self.state.lock().neighbors = neighbors;

        node.reply(&msg, Body::from_payload(&BroadcastReply::TopologyOk)?)
            .await?;
        Ok(())
    }

    async fn handle_read(&self, node: Node, msg: Message) -> HandlerResult {
        let messages = self.messages();
        node.reply(&msg, Body::from_payload(&BroadcastReply::ReadOk { messages })?)
            .await?;
        Ok(())
    }

    async fn handle_broadcast(&self, node: Node, msg: Message) -> HandlerResult {
        let req: BroadcastRequest = msg.body.parse()?;

        // Decide under the lock; send after releasing it.
        let forward_to = {
            let mut state = self.state.lock();
            if state.messages.insert(req.message.clone()) {
                state.neighbors.clone()
            } else {
                Vec::new()
            }
        };

        if !forward_to.is_empty() {
            debug!(message = %req.message, ?forward_to, "gossiping");
        }
        for neighbor in forward_to {
            let gossip = Body::new("broadcast").with("message", req.message.clone());
            if let Err(err) = node.send(&neighbor, gossip).await {
                warn!(%neighbor, error = %err, "failed to gossip");
            }
        }

        if msg.body.msg_id.is_some() {
            node.reply(&msg, Body::from_payload(&BroadcastReply::BroadcastOk)?)
                .await?;
        }
        Ok(())
    }
}
