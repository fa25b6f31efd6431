//! Node store: the authoritative inventory of simulated E2 nodes.

use super::EntityStore;
use super::watch::WatchReceiver;
use crate::error::Result;
use crate::model::{Node, NodeId, NodeStatus};

pub struct NodeStore {
    inner: EntityStore<NodeId, Node>,
}

impl NodeStore {
    pub fn new() -> Self {
        NodeStore { inner: EntityStore::new("node") }
    }

    pub fn get(&self, id: &NodeId) -> Result<Node> {
        self.inner.get(id)
    }

    pub fn create(&self, node: Node) -> Result<()> {
        self.inner.create(node.node_id, node)
    }

    /// Used by the topology generator's bulk load, which has no reason to
    /// fail on an ID it just minted itself.
    pub fn put(&self, node: Node) {
        self.inner.put(node.node_id, node)
    }

    pub fn update(&self, id: &NodeId, mutate: impl FnOnce(&mut Node)) -> Result<Node> {
        self.inner.update(id, mutate)
    }

    pub fn delete(&self, id: &NodeId) -> Result<Node> {
        self.inner.delete(id)
    }

    pub fn list(&self) -> Vec<Node> {
        self.inner.list()
    }

    pub fn list_running(&self) -> Vec<Node> {
        self.inner.list_filtered(|n| n.status == NodeStatus::Running)
    }

    pub fn watch(&self) -> WatchReceiver<NodeId, Node> {
        self.inner.watch()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}
