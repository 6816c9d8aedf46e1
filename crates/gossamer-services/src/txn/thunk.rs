use crate::kv::{KvResult, LinKv};
use gossamer_node::RpcError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::OnceCell;
use tracing::warn;

/// A write-once value stored in the KV service under its id.
///
/// Loaded on first [`Thunk::value`] and cached; written at most once by
/// [`Thunk::save`].
pub struct Thunk {
    id: String,
    value: OnceCell<Value>,
    saved: AtomicBool,
    kv: LinKv,
}

impl Thunk {
    /// A reference to a value already in the store.
    pub fn stored(kv: LinKv, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: OnceCell::new(),
            saved: AtomicBool::new(true),
            kv,
        }
    }

    /// A new value that exists only locally until saved.
    pub fn unsaved(kv: LinKv, id: impl Into<String>, value: Value) -> Self {
        Self {
            id: id.into(),
            value: OnceCell::new_with(Some(value)),
            saved: AtomicBool::new(false),
            kv,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_saved(&self) -> bool {
        self.saved.load(Ordering::Acquire)
    }

    pub async fn value(&self) -> KvResult<&Value> {
        self.value
            .get_or_try_init(|| async {
                self.kv.read(&self.id).await?.ok_or_else(|| {
                    RpcError::key_does_not_exist(format!("thunk {} is missing", self.id))
                })
            })
            .await
    }

    pub async fn save(&self) -> KvResult<()> {
        if self.is_saved() {
            return Ok(());
        }
        let value = self.value().await?.clone();
        if let Err(err) = self.kv.write(&self.id, value).await {
            warn!(id = %self.id, error = %err, "thunk write failed");
            return Err(RpcError::abort(format!("unable to save thunk {}", self.id)));
        }
        self.saved.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use gossamer_node::sim::Network;
    use gossamer_node::NodeConfig;
    use serde_json::json;
    use std::sync::Arc;

    async fn setup() -> (LinKv, Arc<MemoryKv>) {
        let network = Network::new();
        let store = Arc::new(MemoryKv::new());
        network.add_service("lin-kv", store.clone());
        let node = network.node(NodeConfig::default());
        network.add_node("n1", node.clone());
        let client = network.client("c1");
        network.init(&client).await.unwrap();
        (LinKv::new(node, "lin-kv"), store)
    }

    #[tokio::test]
    async fn test_save_writes_once() {
        let (kv, store) = setup().await;
        let thunk = Thunk::unsaved(kv, "n1-0", json!([1, 2]));
        assert!(!thunk.is_saved());
        assert!(store.is_empty());

        thunk.save().await.unwrap();
        assert!(thunk.is_saved());
        assert_eq!(store.get("n1-0"), Some(json!([1, 2])));

        thunk.save().await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_stored_value_is_loaded_lazily() {
        let (kv, store) = setup().await;
        Thunk::unsaved(kv.clone(), "n1-7", json!("v")).save().await.unwrap();

        let thunk = Thunk::stored(kv, "n1-7");
        assert_eq!(thunk.value().await.unwrap(), &json!("v"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_thunk() {
        let (kv, _store) = setup().await;
        let err = Thunk::stored(kv, "n1-9").value().await.unwrap_err();
        assert_eq!(err.code, gossamer_node::ErrorCode::KeyDoesNotExist);
    }
}
