use super::idgen::IdGen;
use super::map::PersistentMap;
use super::op::Op;
use crate::kv::{KvResult, LinKv};
use gossamer_node::RpcError;
use serde_json::Value;
use tracing::{debug, info};

/// KV key holding the id of the current map.
pub const ROOT: &str = "root";

/// The transactor's view of the database: a root pointer in the KV store.
pub struct State {
    kv: LinKv,
    idgen: IdGen,
}

impl State {
    pub fn new(kv: LinKv, idgen: IdGen) -> Self {
        Self { kv, idgen }
    }

    /// Runs `txn` against the current root and commits it with one CAS.
    ///
    /// Read-only transactions never touch the root. A lost CAS rejects the
    /// whole transaction with `txn-conflict`; there is no retry.
    pub async fn transact(&self, txn: Vec<Op>) -> KvResult<Vec<Op>> {
        let map1 = match self.kv.read(ROOT).await? {
            Some(Value::String(id)) => PersistentMap::load(self.kv.clone(), id),
            Some(other) => {
                return Err(RpcError::crash(format!("root is not a map id: {other}")));
            }
            None => PersistentMap::empty(self.kv.clone(), self.idgen.new_id()?),
        };

        let (map2, txn2) = map1.transact(&self.idgen, txn).await?;
        let Some(map2) = map2 else {
            debug!(root = %map1.id(), "read-only transaction");
            return Ok(txn2);
        };

        map2.save().await?;
        let committed = self
            .kv
            .cas(ROOT, map1.id().into(), map2.id().into(), true)
            .await?;
        if !committed {
            info!(from = %map1.id(), to = %map2.id(), "root moved, rejecting transaction");
            return Err(RpcError::txn_conflict("CAS failed!"));
        }
        debug!(from = %map1.id(), to = %map2.id(), "committed");
        Ok(txn2)
    }
}
