//! Optimistic transactions over a linearizable KV store.
//!
//! The database is a [`PersistentMap`] whose id sits under the `root` key.
//! Each transaction reads the root, applies its ops to a new map version,
//! saves every new thunk under a fresh id and then moves the root with a
//! single compare-and-swap. Nothing is locked locally; the CAS is the only
//! serialization point, and a transaction that loses it is rejected whole.

mod idgen;
mod map;
mod op;
mod state;
mod thunk;

pub use idgen::IdGen;
pub use map::PersistentMap;
pub use op::Op;
pub use state::{State, ROOT};
pub use thunk::Thunk;

use crate::config::ServiceConfig;
use crate::kv::LinKv;
use gossamer_node::{Body, HandlerResult, Message, Node, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Deserialize)]
struct TxnRequest {
    txn: Vec<Op>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TxnReply {
    TxnOk { txn: Vec<Op> },
}

/// Serves `txn` requests.
pub struct Transactor {
    state: State,
}

impl Transactor {
    /// Registers the `txn` handler on `node`, talking to the KV service
    /// named in `config`.
    pub fn install(node: &Node, config: &ServiceConfig) -> Result<Arc<Self>> {
        let kv = LinKv::new(node.clone(), config.kv_service.clone());
        let transactor = Arc::new(Self {
            state: State::new(kv, IdGen::new(node.clone())),
        });

        let this = Arc::clone(&transactor);
        node.on("txn", move |node, msg| {
            let this = Arc::clone(&this);
            async move { this.handle_txn(node, msg).await }
        })?;

        Ok(transactor)
    }

    async fn handle_txn(&self, node: Node, msg: Message) -> HandlerResult {
        let req: TxnRequest = msg.body.parse()?;
        info!(txn = ?req.txn, "transaction");
        let txn = self.state.transact(req.txn).await?;
        node.reply(&msg, Body::from_payload(&TxnReply::TxnOk { txn })?)
            .await?;
        Ok(())
    }
}
