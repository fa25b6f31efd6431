//! Cell store: sector geometry, admission limits, and neighbor sets.

use super::EntityStore;
use super::watch::WatchReceiver;
use crate::error::Result;
use crate::model::{Cell, Ecgi, NodeId};

pub struct CellStore {
    inner: EntityStore<Ecgi, Cell>,
}

impl CellStore {
    pub fn new() -> Self {
        CellStore { inner: EntityStore::new("cell") }
    }

    pub fn get(&self, ecgi: &Ecgi) -> Result<Cell> {
        self.inner.get(ecgi)
    }

    pub fn create(&self, cell: Cell) -> Result<()> {
        self.inner.create(cell.ecgi, cell)
    }

    pub fn put(&self, cell: Cell) {
        self.inner.put(cell.ecgi, cell)
    }

    pub fn update(&self, ecgi: &Ecgi, mutate: impl FnOnce(&mut Cell)) -> Result<Cell> {
        self.inner.update(ecgi, mutate)
    }

    pub fn delete(&self, ecgi: &Ecgi) -> Result<Cell> {
        self.inner.delete(ecgi)
    }

    pub fn list(&self) -> Vec<Cell> {
        self.inner.list()
    }

    pub fn list_by_node(&self, node_id: &NodeId) -> Vec<Cell> {
        self.inner.list_filtered(|c| c.node_id == *node_id)
    }

    pub fn watch(&self) -> WatchReceiver<Ecgi, Cell> {
        self.inner.watch()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CellStore {
    fn default() -> Self {
        Self::new()
    }
}
