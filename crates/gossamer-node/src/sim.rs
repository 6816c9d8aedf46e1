//! In-memory network for tests and local simulation.
//!
//! A [`Network`] routes messages between nodes, in-process [`Service`]s
//! (stand-ins for external peers such as `lin-kv`) and [`Client`] inboxes
//! that play the role of the harness driver. Delivery is reliable but, like
//! the real harness, makes no ordering promise across senders.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::message::{Body, Message};
use crate::node::Node;
use crate::transport::MemoryTransport;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// An RPC peer implemented in-process.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Handles one request and returns the reply body. Correlation fields
    /// are filled in by the network.
    async fn handle(&self, request: &Message) -> Body;
}

#[derive(Clone)]
enum Route {
    Node(Node),
    Service(Arc<dyn Service>),
    Inbox(mpsc::UnboundedSender<Message>),
}

/// A simulated cluster network.
#[derive(Clone)]
pub struct Network {
    routes: Arc<RwLock<HashMap<String, Route>>>,
    node_ids: Arc<RwLock<Vec<String>>>,
    outbox: mpsc::UnboundedSender<Message>,
}

impl Network {
    /// Creates a network and spawns its router task.
    pub fn new() -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let network = Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            node_ids: Arc::new(RwLock::new(Vec::new())),
            outbox,
        };
        tokio::spawn(route_messages(
            Arc::clone(&network.routes),
            network.outbox.clone(),
            inbox,
        ));
        network
    }

    /// A transport that writes into this network.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport::new(self.outbox.clone())
    }

    /// Creates a node wired to this network. Register handlers on it, then
    /// call [`Network::add_node`].
    pub fn node(&self, config: NodeConfig) -> Node {
        Node::new(Arc::new(self.transport()), config)
    }

    pub fn add_node(&self, id: impl Into<String>, node: Node) {
        let id = id.into();
        self.node_ids.write().push(id.clone());
        self.routes.write().insert(id, Route::Node(node));
    }

    pub fn add_service(&self, id: impl Into<String>, service: Arc<dyn Service>) {
        self.routes.write().insert(id.into(), Route::Service(service));
    }

    /// Registers a client endpoint; everything sent to `id` lands in it.
    pub fn client(&self, id: impl Into<String>) -> Client {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.write().insert(id.clone(), Route::Inbox(tx));
        Client {
            id,
            outbox: self.outbox.clone(),
            inbox: Mutex::new(ClientInbox {
                rx,
                backlog: VecDeque::new(),
            }),
            next_msg_id: AtomicU64::new(0),
            timeout: Duration::from_secs(5),
        }
    }

    /// Ids of every node added so far, in insertion order.
    pub fn node_ids(&self) -> Vec<String> {
        self.node_ids.read().clone()
    }

    /// Sends `init` to every node and waits for each `init_ok`.
    pub async fn init(&self, client: &Client) -> Result<()> {
        let node_ids = self.node_ids();
        for id in &node_ids {
            let body = Body::new("init")
                .with("node_id", id.as_str())
                .with("node_ids", json!(node_ids));
            let reply = client.call(id, body).await?;
            if let Some(err) = reply.body.error() {
                return Err(err.into());
            }
        }
        Ok(())
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}

async fn route_messages(
    routes: Arc<RwLock<HashMap<String, Route>>>,
    outbox: mpsc::UnboundedSender<Message>,
    mut inbox: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = inbox.recv().await {
        let route = routes.read().get(&msg.dest).cloned();
        match route {
            Some(Route::Node(node)) => node.dispatch(msg).await,
            Some(Route::Service(service)) => {
                let outbox = outbox.clone();
                tokio::spawn(async move {
                    let mut body = service.handle(&msg).await;
                    body.in_reply_to = msg.body.msg_id;
                    let _ = outbox.send(Message::new(msg.dest, msg.src, body));
                });
            }
            Some(Route::Inbox(tx)) => {
                let _ = tx.send(msg);
            }
            None => warn!(dest = %msg.dest, "dropping message for unknown destination"),
        }
    }
}

struct ClientInbox {
    rx: mpsc::UnboundedReceiver<Message>,
    backlog: VecDeque<Message>,
}

/// A driver endpoint: sends requests into the network and collects replies.
pub struct Client {
    id: String,
    outbox: mpsc::UnboundedSender<Message>,
    inbox: Mutex<ClientInbox>,
    next_msg_id: AtomicU64,
    timeout: Duration,
}

impl Client {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends a message without a `msg_id`.
    pub fn send(&self, dest: &str, body: Body) -> Result<()> {
        self.outbox
            .send(Message::new(self.id.clone(), dest, body))
            .map_err(|_| closed())
    }

    /// Sends a request and waits for the reply correlated to it. Unrelated
    /// messages that arrive meanwhile stay queued for [`Client::recv`].
    pub async fn call(&self, dest: &str, mut body: Body) -> Result<Message> {
        let msg_id = self.next_msg_id.fetch_add(1, Ordering::SeqCst) + 1;
        body.msg_id = Some(msg_id);
        self.send(dest, body)?;

        let mut inbox = self.inbox.lock().await;
        if let Some(pos) = inbox
            .backlog
            .iter()
            .position(|m| m.body.in_reply_to == Some(msg_id))
        {
            return inbox.backlog.remove(pos).ok_or_else(closed);
        }

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            match tokio::time::timeout_at(deadline, inbox.rx.recv()).await {
                Ok(Some(msg)) if msg.body.in_reply_to == Some(msg_id) => return Ok(msg),
                Ok(Some(msg)) => inbox.backlog.push_back(msg),
                Ok(None) => return Err(closed()),
                Err(_) => {
                    return Err(NodeError::Timeout {
                        dest: dest.to_string(),
                        msg_id,
                    })
                }
            }
        }
    }

    /// Next message delivered to this client, or `None` after `wait`.
    pub async fn recv(&self, wait: Duration) -> Option<Message> {
        let mut inbox = self.inbox.lock().await;
        if let Some(msg) = inbox.backlog.pop_front() {
            return Some(msg);
        }
        tokio::time::timeout(wait, inbox.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

fn closed() -> NodeError {
    NodeError::Transport(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "network closed",
    ))
}
