//! Linearizable key-value store access.
//!
//! [`LinKv`] is the client side: synchronous RPCs to a `lin-kv` peer.
//! [`MemoryKv`] is an in-process store with the same wire behavior, used by
//! the simulator and the tests.

use async_trait::async_trait;
use gossamer_crdt::Datum;
use gossamer_node::sim::Service;
use gossamer_node::{Body, ErrorCode, Message, Node, RpcError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Result of a KV operation or anything built on one.
pub type KvResult<T> = std::result::Result<T, RpcError>;

#[derive(Deserialize)]
struct ReadReply {
    value: Value,
}

/// Client for a linearizable key-value service.
#[derive(Clone)]
pub struct LinKv {
    node: Node,
    service: String,
}

impl LinKv {
    pub fn new(node: Node, service: impl Into<String>) -> Self {
        Self {
            node,
            service: service.into(),
        }
    }

    /// Reads `key`; `None` if the store has no such key.
    pub async fn read(&self, key: &str) -> KvResult<Option<Value>> {
        let reply = self
            .node
            .sync_rpc(&self.service, Body::new("read").with("key", key))
            .await?;
        match reply.body.error() {
            Some(err) if err.code == ErrorCode::KeyDoesNotExist => Ok(None),
            Some(err) => Err(err),
            None => Ok(Some(reply.body.parse::<ReadReply>()?.value)),
        }
    }

    pub async fn write(&self, key: &str, value: Value) -> KvResult<()> {
        let body = Body::new("write").with("key", key).with("value", value);
        let reply = self.node.sync_rpc(&self.service, body).await?;
        match reply.body.error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Compare-and-swap. `Ok(false)` when the store refuses the swap.
    pub async fn cas(
        &self,
        key: &str,
        from: Value,
        to: Value,
        create_if_not_exists: bool,
    ) -> KvResult<bool> {
        let body = Body::new("cas")
            .with("key", key)
            .with("from", from)
            .with("to", to)
            .with("create_if_not_exists", create_if_not_exists);
        let reply = self.node.sync_rpc(&self.service, body).await?;
        if let Some(err) = reply.body.error() {
            debug!(%key, error = %err, "cas refused");
            return Ok(false);
        }
        Ok(true)
    }
}

#[derive(Deserialize)]
struct KeyRequest {
    key: Datum,
}

#[derive(Deserialize)]
struct WriteRequest {
    key: Datum,
    value: Value,
}

#[derive(Deserialize)]
struct CasRequest {
    key: Datum,
    from: Value,
    to: Value,
    #[serde(default)]
    create_if_not_exists: bool,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KvReply {
    ReadOk { value: Value },
    WriteOk,
    CasOk,
}

/// An in-memory linearizable key-value store.
///
/// Every operation runs under one lock, so operations are totally ordered.
#[derive(Default)]
pub struct MemoryKv {
    data: Mutex<BTreeMap<Datum, Value>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value at `key`.
    pub fn get(&self, key: impl Into<Value>) -> Option<Value> {
        self.data.lock().get(&Datum::new(key)).cloned()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    fn apply(&self, request: &Message) -> KvResult<Body> {
        let reply = match request.kind() {
            "read" => {
                let req: KeyRequest = request.body.parse()?;
                let value = self
                    .data
                    .lock()
                    .get(&req.key)
                    .cloned()
                    .ok_or_else(|| RpcError::key_does_not_exist("key does not exist"))?;
                KvReply::ReadOk { value }
            }
            "write" => {
                let req: WriteRequest = request.body.parse()?;
                self.data.lock().insert(req.key, req.value);
                KvReply::WriteOk
            }
            "cas" => {
                let req: CasRequest = request.body.parse()?;
                let mut data = self.data.lock();
                match data.get_mut(&req.key) {
                    Some(current) if *current == req.from => *current = req.to,
                    Some(current) => {
                        return Err(RpcError::precondition_failed(format!(
                            "expected {}, but had {}",
                            req.from, current
                        )))
                    }
                    None if req.create_if_not_exists => {
                        data.insert(req.key, req.to);
                    }
                    None => return Err(RpcError::key_does_not_exist("key does not exist")),
                }
                KvReply::CasOk
            }
            other => {
                return Err(RpcError::not_supported(format!(
                    "unsupported kv operation {other}"
                )))
            }
        };
        Ok(Body::from_payload(&reply)?)
    }
}

#[async_trait]
impl Service for MemoryKv {
    async fn handle(&self, request: &Message) -> Body {
        match self.apply(request) {
            Ok(body) => body,
            Err(err) => Body::from_error(&err),
        }
    }
}
