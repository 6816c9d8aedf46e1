use super::idgen::IdGen;
use super::op::Op;
use super::thunk::Thunk;
use crate::kv::{KvResult, LinKv};
use futures::future::try_join_all;
use gossamer_crdt::Datum;
use gossamer_node::RpcError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

type Entries = BTreeMap<Datum, Arc<Thunk>>;

/// An immutable map from keys to value thunks, itself stored as a thunk.
///
/// Stored form is a list of `[key, thunk-id]` pairs, so keys may be any
/// JSON value. New versions come from [`PersistentMap::assoc`] and share
/// every untouched entry with the version they were derived from.
pub struct PersistentMap {
    thunk: Thunk,
    entries: OnceCell<Entries>,
    kv: LinKv,
}

impl PersistentMap {
    /// The saved map with the given id; nothing is read until needed.
    pub fn load(kv: LinKv, id: impl Into<String>) -> Self {
        Self {
            thunk: Thunk::stored(kv.clone(), id),
            entries: OnceCell::new(),
            kv,
        }
    }

    /// A new, unsaved, empty map.
    pub fn empty(kv: LinKv, id: impl Into<String>) -> Self {
        Self::from_entries(kv, id, Entries::new())
    }

    fn from_entries(kv: LinKv, id: impl Into<String>, entries: Entries) -> Self {
        let pairs = entries
            .iter()
            .map(|(k, thunk)| Value::Array(vec![k.as_value().clone(), thunk.id().into()]))
            .collect();
        Self {
            thunk: Thunk::unsaved(kv.clone(), id, Value::Array(pairs)),
            entries: OnceCell::new_with(Some(entries)),
            kv,
        }
    }

    pub fn id(&self) -> &str {
        self.thunk.id()
    }

    async fn entries(&self) -> KvResult<&Entries> {
        self.entries
            .get_or_try_init(|| async {
                let stored = self.thunk.value().await?;
                let pairs: Vec<(Datum, String)> = serde_json::from_value(stored.clone())
                    .map_err(|e| RpcError::crash(format!("corrupt map {}: {e}", self.id())))?;
                Ok(pairs
                    .into_iter()
                    .map(|(k, id)| (k, Arc::new(Thunk::stored(self.kv.clone(), id))))
                    .collect())
            })
            .await
    }

    /// The value at `key`, if any.
    pub async fn get(&self, key: &Datum) -> KvResult<Option<Value>> {
        match self.entries().await?.get(key) {
            Some(thunk) => Ok(Some(thunk.value().await?.clone())),
            None => Ok(None),
        }
    }

    /// A new version of this map with `key` bound to `value`.
    pub async fn assoc(&self, idgen: &IdGen, key: Datum, value: Value) -> KvResult<Self> {
        let mut entries = self.entries().await?.clone();
        let thunk = Thunk::unsaved(self.kv.clone(), idgen.new_id()?, value);
        entries.insert(key, Arc::new(thunk));
        Ok(Self::from_entries(self.kv.clone(), idgen.new_id()?, entries))
    }

    /// Writes every unsaved value, then the map itself.
    pub async fn save(&self) -> KvResult<()> {
        // A saved map's entries were saved before it.
        if self.thunk.is_saved() {
            return Ok(());
        }
        let entries = self.entries().await?;
        try_join_all(entries.values().map(|thunk| thunk.save())).await?;
        self.thunk.save().await
    }

    /// Applies `txn`, returning the resulting map (None if nothing changed)
    /// and the completed operations.
    pub async fn transact(&self, idgen: &IdGen, txn: Vec<Op>) -> KvResult<(Option<Self>, Vec<Op>)> {
        let mut current: Option<Self> = None;
        let mut completed = Vec::with_capacity(txn.len());

        for op in txn {
            let map = current.as_ref().unwrap_or(self);
            match op {
                Op::Read { key, .. } => {
                    let value = map.get(&key).await?.unwrap_or_else(|| Value::Array(Vec::new()));
                    completed.push(Op::Read { key, value });
                }
                Op::Append { key, value } => {
                    let mut list = match map.get(&key).await? {
                        Some(Value::Array(list)) => list,
                        None => Vec::new(),
                        Some(other) => {
                            return Err(RpcError::crash(format!(
                                "value at {key} is not a list: {other}"
                            )))
                        }
                    };
                    list.push(value.clone());
                    let next = map.assoc(idgen, key.clone(), Value::Array(list)).await?;
                    current = Some(next);
                    completed.push(Op::Append { key, value });
                }
            }
        }

        Ok((current, completed))
    }
}
