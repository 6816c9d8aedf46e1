use crate::kv::KvResult;
use gossamer_node::Node;
use std::sync::atomic::{AtomicU64, Ordering};

/// Cluster-unique ids of the form `{node_id}-{n}`.
pub struct IdGen {
    node: Node,
    next: AtomicU64,
}

impl IdGen {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            next: AtomicU64::new(0),
        }
    }

    pub fn new_id(&self) -> KvResult<String> {
        let node_id = self.node.node_id()?;
        let i = self.next.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{node_id}-{i}"))
    }
}
