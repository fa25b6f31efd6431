//! Concurrent in-memory inventory of Nodes, Cells, and UEs (§4.B).
//!
//! `EntityStore<K, V>` is the common CRUD+watch shell every store in this
//! module wraps: a `std::sync::RwLock`-guarded map plus a `WatcherRegistry`.
//! A `RwLock` (not an async lock) is deliberate — every critical section
//! here is a handful of map operations with no `.await` inside it, so the
//! blocking lock never stalls the cooperative executor (§10.1, §5).

pub mod cells;
pub mod nodes;
pub mod subscriptions;
pub mod ues;
pub mod watch;

use crate::error::{Error, Result};
use crate::model::EventKind;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use watch::{WatchReceiver, WatcherRegistry};

pub(crate) struct EntityStore<K, V> {
    entities: RwLock<HashMap<K, V>>,
    watchers: WatcherRegistry<K, V>,
    kind_name: &'static str,
}

impl<K, V> EntityStore<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub(crate) fn new(kind_name: &'static str) -> Self {
        EntityStore {
            entities: RwLock::new(HashMap::new()),
            watchers: WatcherRegistry::new(),
            kind_name,
        }
    }

    pub(crate) fn get(&self, key: &K) -> Result<V> {
        self.entities
            .read()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("{} not found", self.kind_name)))
    }

    pub(crate) fn create(&self, key: K, value: V) -> Result<()> {
        let mut map = self.entities.write().unwrap();
        if map.contains_key(&key) {
            return Err(Error::AlreadyExists(format!("{} already exists", self.kind_name)));
        }
        map.insert(key.clone(), value.clone());
        drop(map);
        self.watchers.notify(key, value, EventKind::Created);
        Ok(())
    }

    /// Insert unconditionally, overwriting any existing value and emitting
    /// `Created` (used by bulk load paths like the topology generator,
    /// where "already exists" would just be friction).
    pub(crate) fn put(&self, key: K, value: V) {
        let mut map = self.entities.write().unwrap();
        map.insert(key.clone(), value.clone());
        drop(map);
        self.watchers.notify(key, value, EventKind::Created);
    }

    pub(crate) fn update(&self, key: &K, mutate: impl FnOnce(&mut V)) -> Result<V> {
        let mut map = self.entities.write().unwrap();
        let entry = map.get_mut(key).ok_or_else(|| Error::NotFound(format!("{} not found", self.kind_name)))?;
        mutate(entry);
        let updated = entry.clone();
        drop(map);
        self.watchers.notify(key.clone(), updated.clone(), EventKind::Updated);
        Ok(updated)
    }

    pub(crate) fn delete(&self, key: &K) -> Result<V> {
        let mut map = self.entities.write().unwrap();
        let value = map.remove(key).ok_or_else(|| Error::NotFound(format!("{} not found", self.kind_name)))?;
        drop(map);
        self.watchers.notify(key.clone(), value.clone(), EventKind::Deleted);
        Ok(value)
    }

    pub(crate) fn list(&self) -> Vec<V> {
        self.entities.read().unwrap().values().cloned().collect()
    }

    pub(crate) fn list_filtered(&self, predicate: impl Fn(&V) -> bool) -> Vec<V> {
        self.entities.read().unwrap().values().filter(|v| predicate(v)).cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entities.read().unwrap().len()
    }

    /// Register a watcher. Replay and registration happen under the same
    /// read-then-upgrade critical section as far as callers observe: the
    /// snapshot handed to `WatcherRegistry::watch` reflects the map at the
    /// instant no writer could be running (`entities` read lock held).
    pub(crate) fn watch(&self) -> WatchReceiver<K, V> {
        let map = self.entities.read().unwrap();
        let snapshot: Vec<(K, V)> = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.watchers.watch(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventKind;

    fn fresh_store() -> EntityStore<u32, String> {
        EntityStore::new("test-entity")
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = fresh_store();
        store.create(1, "a".to_string()).unwrap();
        assert_eq!(store.get(&1).unwrap(), "a");
    }

    #[test]
    fn duplicate_create_is_already_exists() {
        let store = fresh_store();
        store.create(1, "a".to_string()).unwrap();
        assert!(matches!(store.create(1, "b".to_string()), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn delete_of_absent_key_is_not_found_and_mutates_nothing() {
        let store = fresh_store();
        store.create(1, "a".to_string()).unwrap();
        assert!(matches!(store.delete(&2), Err(Error::NotFound(_))));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn watch_replay_then_live_events_preserve_total_order() {
        let store = fresh_store();
        store.create(1, "a".to_string()).unwrap();

        let rx = store.watch();
        store.create(2, "b".to_string()).unwrap();
        store.update(&1, |v| *v = "a2".to_string()).unwrap();

        let mut kinds = Vec::new();
        for _ in 0..3 {
            let event = rx.try_receive().unwrap();
            kinds.push(event.kind);
        }
        assert_eq!(kinds, vec![EventKind::None, EventKind::Created, EventKind::Updated]);
        assert!(rx.try_receive().is_err());
    }

    #[test]
    fn list_filtered_matches_predicate() {
        let store = fresh_store();
        store.create(1, "a".to_string()).unwrap();
        store.create(2, "b".to_string()).unwrap();
        let matched = store.list_filtered(|v| v == "a");
        assert_eq!(matched, vec!["a".to_string()]);
    }
}
