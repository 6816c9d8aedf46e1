//! The node runtime.
//!
//! A [`Node`] is a cheap, clonable handle to one runtime instance. Services
//! register handlers on it, and the process entry point drives it with
//! [`Node::run`]. Every dispatched handler and every RPC continuation runs
//! on its own tokio task, so handlers for distinct messages may execute in
//! parallel; replies are matched to requests strictly by
//! `in_reply_to` → `msg_id`.
//!
//! # Failure policy
//!
//! Nothing a peer sends can stop the dispatch loop:
//!
//! - malformed lines are logged and skipped,
//! - messages matching neither a pending RPC nor a handler are logged and,
//!   if they carry a `msg_id`, answered with a `crash` error,
//! - handler errors and panics are caught at the task boundary and reported
//!   to the requester as an `error` reply.
//!
//! # Ordering
//!
//! All output goes through one async send lock. An RPC allocates its
//! `msg_id` and writes its request while holding it, so request ids appear
//! on the wire in increasing order.

use crate::config::NodeConfig;
use crate::error::{NodeError, Result, RpcError};
use crate::message::{read_message, Body, Message};
use crate::transport::{LineTransport, Transport};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

/// What a handler or periodic action returns.
pub type HandlerResult = std::result::Result<(), RpcError>;

type Handler = Arc<dyn Fn(Node, Message) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type Callback = Box<dyn FnOnce(Message) + Send>;
type PeriodicAction = Arc<dyn Fn(Node) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// This node's place in the cluster, fixed by the first `init` message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub node_id: String,
    pub node_ids: Vec<String>,
}

impl Identity {
    /// Every cluster member except this node.
    pub fn peers(&self) -> impl Iterator<Item = &String> {
        self.node_ids.iter().filter(move |id| **id != self.node_id)
    }
}

#[derive(Deserialize)]
struct InitRequest {
    node_id: String,
    node_ids: Vec<String>,
}

#[derive(Clone)]
struct PeriodicTask {
    interval: Duration,
    action: PeriodicAction,
}

#[derive(Default)]
struct PeriodicState {
    tasks: Vec<PeriodicTask>,
    started: bool,
}

/// Message-id counter and pending continuations, guarded together.
#[derive(Default)]
struct RpcState {
    next_msg_id: u64,
    callbacks: HashMap<u64, Callback>,
}

struct NodeInner {
    config: NodeConfig,
    identity: OnceLock<Identity>,
    handlers: RwLock<HashMap<String, Handler>>,
    rpc: Mutex<RpcState>,
    periodic: Mutex<PeriodicState>,
    send_lock: AsyncMutex<()>,
    transport: Arc<dyn Transport>,
}

/// Handle to a node runtime.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Creates a runtime writing through `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: NodeConfig) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                config,
                identity: OnceLock::new(),
                handlers: RwLock::new(HashMap::new()),
                rpc: Mutex::new(RpcState::default()),
                periodic: Mutex::new(PeriodicState::default()),
                send_lock: AsyncMutex::new(()),
                transport,
            }),
        }
    }

    /// Creates a runtime that writes line-delimited JSON to stdout.
    pub fn stdio(config: NodeConfig) -> Self {
        Self::new(Arc::new(LineTransport::stdout()), config)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// The identity set by `init`, if it has arrived.
    pub fn identity(&self) -> Option<&Identity> {
        self.inner.identity.get()
    }

    pub fn node_id(&self) -> Result<&str> {
        self.identity()
            .map(|id| id.node_id.as_str())
            .ok_or(NodeError::NotInitialized)
    }

    pub fn node_ids(&self) -> Result<&[String]> {
        self.identity()
            .map(|id| id.node_ids.as_slice())
            .ok_or(NodeError::NotInitialized)
    }

    /// Number of RPCs still waiting for a reply.
    pub fn pending_rpcs(&self) -> usize {
        self.inner.rpc.lock().callbacks.len()
    }

    /// Registers the handler for messages of type `kind`.
    ///
    /// Each type has exactly one handler; `init` is built in.
    pub fn on<F, Fut>(&self, kind: &str, handler: F) -> Result<()>
    where
        F: Fn(Node, Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let mut handlers = self.inner.handlers.write();
        if kind == "init" || handlers.contains_key(kind) {
            return Err(NodeError::DuplicateHandler(kind.to_string()));
        }
        handlers.insert(
            kind.to_string(),
            Arc::new(move |node, msg| handler(node, msg).boxed()),
        );
        Ok(())
    }

    /// Runs `action` every `interval`, starting once `init` has arrived.
    ///
    /// The loop is act-then-sleep: a slow action pushes later rounds back.
    pub fn every<F, Fut>(&self, interval: Duration, action: F)
    where
        F: Fn(Node) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let task = PeriodicTask {
            interval,
            action: Arc::new(move |node| action(node).boxed()),
        };
        let started = {
            let mut periodic = self.inner.periodic.lock();
            if !periodic.started {
                periodic.tasks.push(task.clone());
            }
            periodic.started
        };
        if started {
            self.spawn_periodic(task);
        }
    }

    /// Sends `body` to `dest` from this node.
    pub async fn send(&self, dest: &str, body: Body) -> Result<()> {
        let src = self.node_id()?.to_string();
        self.emit(Message::new(src, dest, body)).await
    }

    /// Replies to `request`, correlating via its `msg_id`.
    pub async fn reply(&self, request: &Message, mut body: Body) -> Result<()> {
        body.in_reply_to = request.body.msg_id;
        // Before init we only know our name from the request itself.
        let src = match self.identity() {
            Some(id) => id.node_id.clone(),
            None => request.dest.clone(),
        };
        self.emit(Message::new(src, request.src.clone(), body)).await
    }

    /// Replies to `request` with an `error` body.
    pub async fn reply_error(&self, request: &Message, err: &RpcError) -> Result<()> {
        self.reply(request, Body::from_error(err)).await
    }

    /// Sends an RPC request and returns its `msg_id` immediately.
    ///
    /// `continuation` runs on its own task when the correlated reply
    /// arrives. It is never removed otherwise: a request that is never
    /// answered keeps its entry.
    pub async fn async_rpc<F>(&self, dest: &str, mut body: Body, continuation: F) -> Result<u64>
    where
        F: FnOnce(Message) + Send + 'static,
    {
        let src = self.node_id()?.to_string();
        let _sending = self.inner.send_lock.lock().await;
        let msg_id = {
            let mut rpc = self.inner.rpc.lock();
            rpc.next_msg_id += 1;
            let msg_id = rpc.next_msg_id;
            rpc.callbacks.insert(msg_id, Box::new(continuation));
            msg_id
        };
        body.msg_id = Some(msg_id);

        let msg = Message::new(src, dest, body);
        debug!(dest = %msg.dest, body = ?msg.body, "sent");
        if let Err(err) = self.inner.transport.send(&msg).await {
            self.inner.rpc.lock().callbacks.remove(&msg_id);
            return Err(err);
        }
        Ok(msg_id)
    }

    /// Sends an RPC request and waits for its reply.
    ///
    /// Fails with [`NodeError::Timeout`] after the configured RPC timeout.
    /// A timeout only releases the caller; the request stays outstanding.
    pub async fn sync_rpc(&self, dest: &str, body: Body) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        let msg_id = self
            .async_rpc(dest, body, move |reply| {
                let _ = tx.send(reply);
            })
            .await?;

        match tokio::time::timeout(self.inner.config.rpc_timeout(), rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(NodeError::ReplyDropped(msg_id)),
            Err(_) => Err(NodeError::Timeout {
                dest: dest.to_string(),
                msg_id,
            }),
        }
    }

    /// Routes one inbound message.
    ///
    /// `init` is handled inline so nothing can observe the node before its
    /// identity is set; everything else is handed to a fresh task.
    pub async fn dispatch(&self, msg: Message) {
        debug!(src = %msg.src, body = ?msg.body, "received");

        if msg.body.kind == "init" {
            if let Err(err) = self.handle_init(&msg).await {
                warn!(error = %err, "init failed");
                self.reply_best_effort(&msg, &err.into()).await;
            }
            return;
        }

        if let Some(in_reply_to) = msg.body.in_reply_to {
            let callback = self.inner.rpc.lock().callbacks.remove(&in_reply_to);
            if let Some(callback) = callback {
                tokio::spawn(async move { callback(msg) });
                return;
            }
        }

        let handler = self.inner.handlers.read().get(&msg.body.kind).cloned();
        match handler {
            Some(_) if self.identity().is_none() => {
                warn!(src = %msg.src, kind = %msg.body.kind, "message before init");
                let err = RpcError::temporarily_unavailable(format!(
                    "received {} before init",
                    msg.body.kind
                ));
                self.reply_best_effort(&msg, &err).await;
            }
            Some(handler) => self.spawn_handler(handler, msg),
            None => {
                error!(src = %msg.src, body = ?msg.body, "no handler for message");
                let err = RpcError::crash(format!(
                    "no handler for message type {}",
                    msg.body.kind
                ));
                self.reply_best_effort(&msg, &err).await;
            }
        }
    }

    /// Reads line-delimited messages from `reader` until end of input.
    pub async fn run<R>(&self, mut reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        while let Some(line) = read_message(&mut reader).await? {
            match Message::from_line(&line) {
                Ok(msg) => self.dispatch(msg).await,
                Err(err) => warn!(%line, error = %err, "rejecting malformed message"),
            }
        }
        info!("input closed");
        Ok(())
    }

    /// Runs the dispatch loop over stdin.
    pub async fn run_stdio(&self) -> Result<()> {
        self.run(BufReader::new(tokio::io::stdin())).await
    }

    async fn emit(&self, msg: Message) -> Result<()> {
        let _sending = self.inner.send_lock.lock().await;
        debug!(dest = %msg.dest, body = ?msg.body, "sent");
        self.inner.transport.send(&msg).await
    }

    async fn handle_init(&self, msg: &Message) -> Result<()> {
        let init: InitRequest = msg.body.parse()?;
        let first = self
            .inner
            .identity
            .set(Identity {
                node_id: init.node_id,
                node_ids: init.node_ids,
            })
            .is_ok();

        if first {
            info!(node_id = %self.node_id()?, "node initialized");
        } else {
            warn!(node_id = %self.node_id()?, "repeated init, keeping first identity");
        }

        self.reply(msg, Body::new("init_ok")).await?;

        if first {
            self.start_periodic_tasks();
        }
        Ok(())
    }

    /// Error replies only go to requests; replying to a reply would echo forever.
    async fn reply_best_effort(&self, msg: &Message, err: &RpcError) {
        if msg.body.msg_id.is_none() {
            return;
        }
        if let Err(send_err) = self.reply_error(msg, err).await {
            warn!(error = %send_err, "failed to send error reply");
        }
    }

    fn spawn_handler(&self, handler: Handler, msg: Message) {
        let node = self.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler(node.clone(), msg.clone()))
                .catch_unwind()
                .await;
            let err = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(err)) => err,
                Err(panic) => RpcError::crash(format!(
                    "handler for {} panicked: {}",
                    msg.body.kind,
                    panic_message(&*panic)
                )),
            };
            warn!(src = %msg.src, kind = %msg.body.kind, error = %err, "handler failed");
            node.reply_best_effort(&msg, &err).await;
        });
    }

    fn start_periodic_tasks(&self) {
        let tasks = {
            let mut periodic = self.inner.periodic.lock();
            periodic.started = true;
            std::mem::take(&mut periodic.tasks)
        };
        for task in tasks {
            self.spawn_periodic(task);
        }
    }

    fn spawn_periodic(&self, task: PeriodicTask) {
        let node = self.clone();
        tokio::spawn(async move {
            loop {
                let outcome = AssertUnwindSafe((task.action)(node.clone()))
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(error = %err, "periodic task failed"),
                    Err(panic) => warn!(panic = %panic_message(&*panic), "periodic task panicked"),
                }
                tokio::time::sleep(task.interval).await;
            }
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
